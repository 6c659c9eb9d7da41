// Ledger Event Listener - folds ledger confirmations into the record store
//
// Poll cycle:
// - fetch events since the cursor (bounded by fetch_timeout)
// - handle each event in delivery order (bounded by event_timeout)
// - advance the cursor only past events that were fully handled
//
// A malformed feed entry is logged, reported as Rejected and skipped past. It
// never counts as a failure.
//
// A failed or timed out cycle counts as one consecutive failure. Reaching
// max_consecutive_failures moves the listener to Degraded and halts it.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AppError, AppResult, ListenerError, StoreError};
use crate::ledger::models::{ConfirmationEvent, FeedEvent, InstructionRecord};
use crate::ledger::RecordStore;
use crate::monitoring::RecentEvents;
use crate::scoring::{AnomalyScorer, AnomalyVerdict, SettlementTelemetry};
use crate::settlement::client::LedgerClient;

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub event_timeout: Duration,
    /// Delay before looking up a record again after NotFound
    pub not_found_retry_delay: Duration,
    /// Extra lookups after the first NotFound before declaring an orphan
    pub not_found_retries: u32,
    pub max_consecutive_failures: u32,
    pub start_sequence: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            fetch_timeout: Duration::from_millis(10_000),
            event_timeout: Duration::from_millis(10_000),
            not_found_retry_delay: Duration::from_millis(1000),
            not_found_retries: 1,
            max_consecutive_failures: 5,
            start_sequence: 0,
        }
    }
}

/// Externally observable listener state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ListenerStatus {
    Starting,
    Running { consecutive_failures: u32 },
    Stopped,
    /// Terminal; requires an operator restart
    Degraded { consecutive_failures: u32 },
}

/// What happened to a single confirmation event
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// The record transitioned to a terminal state. `verdict` is None when scoring was skipped.
    Reconciled {
        record: InstructionRecord,
        verdict: Option<AnomalyVerdict>,
    },
    /// Duplicate delivery for a record that is already terminal
    AlreadyReconciled(InstructionRecord),
    /// No record appeared for the instruction after the configured lookups
    Orphan { instruction_id: String },
    /// Feed entry that could not be decoded; nothing was written
    Rejected {
        sequence: Option<u64>,
        reason: String,
    },
}

pub struct LedgerEventListener {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn RecordStore>,
    scorer: Arc<AnomalyScorer>,
    recent: Arc<RecentEvents>,
    config: ListenerConfig,
    cursor: u64,
    consecutive_failures: u32,
    rejected: u64,
    status: watch::Sender<ListenerStatus>,
}

impl LedgerEventListener {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn RecordStore>,
        scorer: Arc<AnomalyScorer>,
        recent: Arc<RecentEvents>,
        config: ListenerConfig,
    ) -> Self {
        let (status, _) = watch::channel(ListenerStatus::Starting);
        Self {
            ledger,
            store,
            scorer,
            recent,
            cursor: config.start_sequence,
            config,
            consecutive_failures: 0,
            rejected: 0,
            status,
        }
    }

    /// Receiver for listener state changes
    pub fn subscribe(&self) -> watch::Receiver<ListenerStatus> {
        self.status.subscribe()
    }

    /// Next ledger sequence to fetch
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Malformed feed entries skipped since start
    pub fn rejected_events(&self) -> u64 {
        self.rejected
    }

    /// Run until `shutdown` flips to true or the listener degrades.
    ///
    /// Shutdown lets the in-flight event finish; unhandled events of the
    /// current batch are fetched again on the next start.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ListenerError> {
        info!(
            "🔄 Listening for confirmation events from sequence {} (poll every {:?})",
            self.cursor, self.config.poll_interval
        );
        self.publish(ListenerStatus::Running {
            consecutive_failures: 0,
        });

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    // A dropped sender also means nobody can keep us running
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if *shutdown.borrow() {
                break;
            }

            self.poll_cycle(&shutdown).await?;
        }

        self.publish(ListenerStatus::Stopped);
        info!("Listener stopped at sequence {}", self.cursor);
        Ok(())
    }

    /// One poll cycle with failure accounting
    pub async fn poll_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> Result<(), ListenerError> {
        match self.poll_once(shutdown).await {
            Ok(processed) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "✓ Ledger feed recovered after {} failed polls",
                        self.consecutive_failures
                    );
                }
                if processed > 0 {
                    debug!("Processed {} events, cursor at {}", processed, self.cursor);
                }
                self.consecutive_failures = 0;
                self.publish(ListenerStatus::Running {
                    consecutive_failures: 0,
                });
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    "⚠️  Poll failed ({}/{}): {}",
                    self.consecutive_failures, self.config.max_consecutive_failures, e
                );

                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    error!(
                        "❌ Listener degraded after {} consecutive failures, halting",
                        self.consecutive_failures
                    );
                    self.publish(ListenerStatus::Degraded {
                        consecutive_failures: self.consecutive_failures,
                    });
                    return Err(ListenerError::Degraded {
                        consecutive_failures: self.consecutive_failures,
                    });
                }

                self.publish(ListenerStatus::Running {
                    consecutive_failures: self.consecutive_failures,
                });
                Ok(())
            }
        }
    }

    /// Fetch and handle one batch. Returns the number of events handled.
    pub async fn poll_once(&mut self, shutdown: &watch::Receiver<bool>) -> AppResult<usize> {
        let events = timeout(
            self.config.fetch_timeout,
            self.ledger.fetch_confirmation_events(self.cursor),
        )
        .await
        .map_err(|_| ListenerError::Timeout("ledger fetch"))??;

        let mut processed = 0;
        for entry in events {
            if *shutdown.borrow() {
                info!("Stop requested, leaving events from sequence {} for next start", self.cursor);
                break;
            }

            let outcome = timeout(self.config.event_timeout, self.handle_feed_event(&entry))
                .await
                .map_err(|_| ListenerError::Timeout("event processing"))??;

            if matches!(outcome, EventOutcome::Rejected { .. }) {
                self.rejected += 1;
            }
            if let Some(sequence) = entry.sequence() {
                self.cursor = self.cursor.max(sequence.saturating_add(1));
            }
            processed += 1;
        }

        Ok(processed)
    }

    /// Dispatch one feed entry; malformed entries are rejected without touching the store
    pub async fn handle_feed_event(&self, entry: &FeedEvent) -> AppResult<EventOutcome> {
        match entry {
            FeedEvent::Confirmation(event) => self.handle_event(event).await,
            FeedEvent::Malformed { sequence, reason } => {
                match sequence {
                    Some(sequence) => error!(
                        "❌ Rejected malformed ledger event at sequence {}: {}",
                        sequence, reason
                    ),
                    None => error!("❌ Rejected malformed ledger event without sequence: {}", reason),
                }
                Ok(EventOutcome::Rejected {
                    sequence: *sequence,
                    reason: reason.clone(),
                })
            }
        }
    }

    /// Fold one confirmation into the store and score the result
    #[instrument(skip(self, event), fields(instruction_id = %event.instruction_id, sequence = event.sequence))]
    pub async fn handle_event(&self, event: &ConfirmationEvent) -> AppResult<EventOutcome> {
        info!("📥 Confirmation received: settled {}", event.settled_amount);

        let Some(record) = self.lookup_with_retry(&event.instruction_id).await? else {
            warn!(
                "⚠️  Orphan event: no record for {} after {} lookups",
                event.instruction_id,
                self.config.not_found_retries + 1
            );
            return Ok(EventOutcome::Orphan {
                instruction_id: event.instruction_id.clone(),
            });
        };

        if record.is_settled() {
            info!("Already reconciled as {}, skipping", record.status);
            return Ok(EventOutcome::AlreadyReconciled(record));
        }

        let outcome = self
            .store
            .apply_settlement(&event.instruction_id, event.settled_amount)
            .await?;

        if !outcome.transitioned {
            info!("Settled concurrently as {}, skipping", outcome.record.status);
            return Ok(EventOutcome::AlreadyReconciled(outcome.record));
        }

        info!(
            "✓ Reconciled {}: expected {} on-chain {} → {}",
            outcome.record.instruction_id,
            outcome.record.expected_amount,
            event.settled_amount,
            outcome.record.status
        );

        let verdict = self.score(&outcome.record, &SettlementTelemetry::from(event));

        Ok(EventOutcome::Reconciled {
            record: outcome.record,
            verdict,
        })
    }

    /// Best-effort scoring; failures never affect the settlement
    fn score(
        &self,
        record: &InstructionRecord,
        telemetry: &SettlementTelemetry,
    ) -> Option<AnomalyVerdict> {
        match self.scorer.score(record, telemetry) {
            Ok(verdict) => {
                if verdict.is_anomaly {
                    warn!("🚨 ANOMALY score {:.4}", verdict.anomaly_score);
                } else {
                    info!("Normal, score {:.4}", verdict.anomaly_score);
                }
                self.recent.push(verdict.clone());
                Some(verdict)
            }
            Err(e) => {
                warn!("Scoring skipped for {}: {}", record.instruction_id, e);
                None
            }
        }
    }

    /// Look a record up, retrying NotFound while the submission may not be visible yet
    async fn lookup_with_retry(&self, instruction_id: &str) -> AppResult<Option<InstructionRecord>> {
        let attempts = self.config.not_found_retries + 1;

        for attempt in 1..=attempts {
            match self.store.get(instruction_id).await {
                Ok(record) => return Ok(Some(record)),
                Err(StoreError::NotFound(_)) if attempt < attempts => {
                    debug!(
                        "Record {} not visible yet (attempt {}/{}), retrying in {:?}",
                        instruction_id, attempt, attempts, self.config.not_found_retry_delay
                    );
                    sleep(self.config.not_found_retry_delay).await;
                }
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(AppError::from(e)),
            }
        }

        Ok(None)
    }

    fn publish(&self, status: ListenerStatus) {
        self.status.send_replace(status);
    }
}
