//! MT202 payment reconciliation: parse interbank transfer messages, submit
//! settlement intents to a ledger, reconcile ledger confirmations against the
//! expected amounts and score every reconciled settlement for anomalies.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ledger;
pub mod message;
pub mod monitoring;
pub mod scoring;
pub mod server;
pub mod settlement;

#[cfg(test)]
mod testing;
