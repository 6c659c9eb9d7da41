// Settlement: intent submission and ledger confirmation handling
pub mod client;
pub mod listener;
pub mod submitter;

pub use client::{HttpLedgerClient, LedgerClient};
pub use listener::{EventOutcome, LedgerEventListener, ListenerConfig, ListenerStatus};
pub use submitter::{SettlementSubmitter, SubmissionReceipt};
