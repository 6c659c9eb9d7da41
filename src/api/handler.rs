use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::models::HealthResponse;
use crate::{
    error::AppResult,
    ledger::{
        models::{normalize_instruction_id, InstructionRecord},
        RecordStore,
    },
    message::{parse_mt202, PaymentInstruction},
    monitoring::RecentEvents,
    scoring::{AnomalyScorer, AnomalyVerdict},
    settlement::{ListenerStatus, SettlementSubmitter, SubmissionReceipt},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub submitter: Arc<SettlementSubmitter>,
    pub scorer: Arc<AnomalyScorer>,
    pub recent: Arc<RecentEvents>,
    pub listener_status: watch::Receiver<ListenerStatus>,
}

/// GET / - liveness banner
pub async fn index() -> &'static str {
    "MT202 reconciliation monitor is running"
}

/// GET /status - recent anomaly verdicts, most recent first
pub async fn get_recent_events(State(state): State<AppState>) -> Json<Vec<AnomalyVerdict>> {
    Json(state.recent.snapshot())
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let listener = *state.listener_status.borrow();

    Json(HealthResponse::new(
        listener,
        state.scorer.is_available(),
        state.recent.len(),
    ))
}

/// POST /api/v1/messages/parse - raw MT202 text to a parsed instruction
pub async fn parse_message(body: String) -> AppResult<Json<PaymentInstruction>> {
    let instruction = parse_mt202(&body)?;
    Ok(Json(instruction))
}

/// POST /api/v1/instructions - parse and submit for settlement
pub async fn submit_instruction(
    State(state): State<AppState>,
    body: String,
) -> AppResult<(StatusCode, Json<SubmissionReceipt>)> {
    let instruction = parse_mt202(&body)?;
    info!(
        "Submitting instruction {:?} for settlement",
        instruction.transaction_reference
    );

    let receipt = state.submitter.submit(&instruction).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/v1/instructions/:instruction_id
pub async fn get_instruction(
    State(state): State<AppState>,
    Path(instruction_id): Path<String>,
) -> AppResult<Json<InstructionRecord>> {
    let record = state
        .store
        .get(&normalize_instruction_id(&instruction_id))
        .await?;
    Ok(Json(record))
}
