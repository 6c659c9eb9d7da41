use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mt202_reconciler::{bootstrap, config::Config, error::ListenerError, server};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,mt202_reconciler=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting MT202 reconciliation service");

    let config = Config::from_env().context("failed to load configuration")?;

    let app = bootstrap::initialize_app_state(&config)
        .await
        .context("failed to initialize application")?;

    let shutdown = app.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown requested");
            shutdown.send_replace(true);
        }
    });

    // A degraded listener takes the whole service down
    let mut listener = app.listener;
    let router = server::create_app(app.state).await;
    let serve = server::run_server(router, &config.bind_address, app.shutdown.subscribe());

    tokio::select! {
        served = serve => {
            served.context("HTTP server failed")?;
            app.shutdown.send_replace(true);
            match listener.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(degraded(e)),
                Err(e) => anyhow::bail!("listener task panicked: {}", e),
            }
        }
        finished = &mut listener => {
            app.shutdown.send_replace(true);
            match finished {
                Ok(Ok(())) => info!("Listener stopped"),
                Ok(Err(e)) => return Err(degraded(e)),
                Err(e) => anyhow::bail!("listener task panicked: {}", e),
            }
        }
    }

    info!("👋 Shutdown complete");
    Ok(())
}

fn degraded(e: ListenerError) -> anyhow::Error {
    error!("❌ {} - operator restart required", e);
    anyhow::Error::new(e)
}
