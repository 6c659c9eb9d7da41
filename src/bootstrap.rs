use std::{sync::Arc, time::Duration};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    config::Config,
    error::{AppResult, ListenerError},
    ledger::{PgRecordStore, RecordStore},
    monitoring::RecentEvents,
    scoring::AnomalyScorer,
    settlement::{HttpLedgerClient, LedgerClient, LedgerEventListener, SettlementSubmitter},
};

/// Running application: HTTP state plus the background listener
pub struct App {
    pub state: AppState,
    pub listener: JoinHandle<Result<(), ListenerError>>,
    /// Send `true` to stop the listener and the HTTP server
    pub shutdown: watch::Sender<bool>,
}

pub async fn initialize_app_state(config: &Config) -> AppResult<App> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url, config.db_max_connections).await?;
    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool));

    // Ledger collaborator
    let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(
        &config.ledger_rpc_url,
        config.settlement_contract_address.clone(),
        config.amount_decimals,
        Duration::from_millis(config.fetch_timeout_ms),
    )?);
    if config.settlement_contract_address.is_none() {
        warn!("⚠️  SETTLEMENT_CONTRACT_ADDRESS not set - intents are sent without a contract address");
    }

    // Anomaly scoring degrades to disabled if artifacts are missing
    let scorer = Arc::new(AnomalyScorer::from_paths(&config.model_path, &config.scaler_path));
    let recent = Arc::new(RecentEvents::new(config.recent_events_capacity));

    let submitter = Arc::new(SettlementSubmitter::new(store.clone(), ledger.clone()));

    let listener = LedgerEventListener::new(
        ledger,
        store.clone(),
        scorer.clone(),
        recent.clone(),
        config.listener_config(),
    );
    let listener_status = listener.subscribe();

    let (shutdown, shutdown_rx) = watch::channel(false);
    let listener = tokio::spawn(listener.run(shutdown_rx));
    info!("✅ Ledger event listener started");

    let state = AppState {
        store,
        submitter,
        scorer,
        recent,
        listener_status,
    };

    Ok(App {
        state,
        listener,
        shutdown,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
