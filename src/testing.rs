//! Test doubles shared by unit tests across modules

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{AppResult, LedgerError};
use crate::ledger::models::{ConfirmationEvent, FeedEvent, SettlementIntent};
use crate::scoring::{AnomalyScorer, ForestArtifact, ModelArtifacts, ScalerArtifact};
use crate::settlement::client::LedgerClient;

/// Scripted ledger: each fetch pops the next queued batch, then returns empty batches
#[derive(Default)]
pub struct MockLedger {
    batches: Mutex<VecDeque<AppResult<Vec<FeedEvent>>>>,
    fetch_cursors: Mutex<Vec<u64>>,
    submitted: Mutex<Vec<SettlementIntent>>,
    fail_submissions: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, events: Vec<ConfirmationEvent>) {
        self.push_feed(events.into_iter().map(FeedEvent::from).collect());
    }

    pub fn push_feed(&self, entries: Vec<FeedEvent>) {
        self.batches.lock().push_back(Ok(entries));
    }

    pub fn push_failure(&self) {
        self.batches
            .lock()
            .push_back(Err(LedgerError::Unreachable("connection refused".to_string()).into()));
    }

    pub fn fail_submissions(&self) {
        self.fail_submissions.store(true, Ordering::SeqCst);
    }

    pub fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    pub fn fetch_cursors(&self) -> Vec<u64> {
        self.fetch_cursors.lock().clone()
    }

    pub fn submitted(&self) -> Vec<SettlementIntent> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit_intent(&self, intent: &SettlementIntent) -> AppResult<String> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(LedgerError::Rejected("execution reverted".to_string()).into());
        }
        self.submitted.lock().push(intent.clone());
        Ok(format!("0xtx{}", self.submitted.lock().len()))
    }

    async fn fetch_confirmation_events(&self, since: u64) -> AppResult<Vec<FeedEvent>> {
        self.fetch_cursors.lock().push(since);

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.batches.lock().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn event(instruction_id: &str, settled_amount: Decimal, sequence: u64) -> ConfirmationEvent {
    ConfirmationEvent {
        instruction_id: instruction_id.to_string(),
        settled_amount,
        sequence,
        resource_cost: None,
    }
}

pub fn malformed(sequence: u64) -> FeedEvent {
    FeedEvent::Malformed {
        sequence: Some(sequence),
        reason: "settled amount \"12.5\": invalid digit found in string".to_string(),
    }
}

/// Scaler centred on the placeholder telemetry so only amount_diff moves a record
pub const FIXTURE_SCALER: &str = r#"{
    "mean": [0.0, 60.0, 50000.0, 1.0],
    "scale": [1.0, 1.0, 1.0, 1.0]
}"#;

/// Single tree isolating any amount_diff above 0.5 at depth one
pub const FIXTURE_FOREST: &str = r#"{
    "max_samples": 256,
    "offset": -0.5,
    "trees": [
        { "nodes": [
            { "feature": 0, "threshold": 0.5, "left": 1, "right": 2 },
            { "samples": 255 },
            { "samples": 1 }
        ] }
    ]
}"#;

pub fn fixture_artifacts() -> ModelArtifacts {
    let scaler: ScalerArtifact = serde_json::from_str(FIXTURE_SCALER).unwrap();
    let forest: ForestArtifact = serde_json::from_str(FIXTURE_FOREST).unwrap();
    ModelArtifacts::new(scaler, forest).unwrap()
}

pub fn fixture_scorer() -> AnomalyScorer {
    AnomalyScorer::new(fixture_artifacts())
}
