use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    get_instruction, get_recent_events, health_check, index, parse_message, submit_instruction,
    AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Monitoring surface
        .route("/", get(index))
        .route("/status", get(get_recent_events))
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                .route("/messages/parse", post(parse_message))
                .route("/instructions", post(submit_instruction))
                .route("/instructions/:instruction_id", get(get_instruction)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until the shutdown flag flips to true
pub async fn run_server(
    app: Router,
    bind_address: &str,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("HTTP server shutting down");
        })
        .await
}
