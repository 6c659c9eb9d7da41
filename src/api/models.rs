use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::settlement::ListenerStatus;

// ========== RESPONSE MODELS ==========

/// Service health, including the ledger event listener state
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub listener: ListenerStatus,
    pub scorer_available: bool,
    pub recent_events: usize,
}

impl HealthResponse {
    pub fn new(listener: ListenerStatus, scorer_available: bool, recent_events: usize) -> Self {
        let status = match listener {
            ListenerStatus::Degraded { .. } | ListenerStatus::Stopped => "degraded",
            ListenerStatus::Starting | ListenerStatus::Running { .. } => "healthy",
        };

        Self {
            status: status.to_string(),
            timestamp: Utc::now(),
            listener,
            scorer_available,
            recent_events,
        }
    }
}
