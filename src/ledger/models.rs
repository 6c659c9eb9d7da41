use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;

/// Absolute tolerance when comparing expected and settled amounts
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.000000001);

/// Settlement status state machine
///
/// PendingSettlement → ReconciledSettled | MismatchAmount. Both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "settlement_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    PendingSettlement,
    ReconciledSettled,
    MismatchAmount,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::PendingSettlement => "PENDING_SETTLEMENT",
            SettlementStatus::ReconciledSettled => "RECONCILED_SETTLED",
            SettlementStatus::MismatchAmount => "MISMATCH_AMOUNT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SettlementStatus::PendingSettlement)
    }

    /// Terminal status for a settlement of `onchain` against `expected`
    pub fn for_amounts(expected: Decimal, onchain: Decimal) -> Self {
        if (expected - onchain).abs() < AMOUNT_TOLERANCE {
            SettlementStatus::ReconciledSettled
        } else {
            SettlementStatus::MismatchAmount
        }
    }
}

/// Instruction record - the durable unit owned by the record store
///
/// INVARIANT: onchain_amount is None iff status == PendingSettlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InstructionRecord {
    pub instruction_id: String,
    pub transaction_reference: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub expected_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub onchain_amount: Option<Decimal>,
    pub currency: String,
    pub value_date: NaiveDate,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstructionRecord {
    /// Build a fresh pending record
    pub fn pending(new: NewInstructionRecord, now: DateTime<Utc>) -> Self {
        Self {
            instruction_id: new.instruction_id,
            transaction_reference: new.transaction_reference,
            expected_amount: new.expected_amount,
            onchain_amount: None,
            currency: new.currency,
            value_date: new.value_date,
            status: SettlementStatus::PendingSettlement,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a settlement to a pending record. Terminal records are left untouched.
    ///
    /// Returns true when the record transitioned.
    pub fn settle(&mut self, onchain_amount: Decimal, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.status = SettlementStatus::for_amounts(self.expected_amount, onchain_amount);
        self.onchain_amount = Some(onchain_amount);
        self.updated_at = now.max(self.updated_at);
        true
    }
}

/// Data required to create a pending record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstructionRecord {
    pub instruction_id: String,
    pub transaction_reference: String,
    pub expected_amount: Decimal,
    pub currency: String,
    pub value_date: NaiveDate,
}

/// Result of folding a settlement into the store
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    pub record: InstructionRecord,
    /// False when the record was already terminal and nothing was written
    pub transitioned: bool,
}

/// Ledger confirmation event asserting a settled amount for an instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationEvent {
    pub instruction_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub settled_amount: Decimal,
    /// Ledger ordering; the listener cursor is the last processed sequence + 1
    pub sequence: u64,
    /// Resource cost (gas used) reported with the settlement, when available
    #[serde(default)]
    pub resource_cost: Option<u64>,
}

/// One entry of the ledger confirmation feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Confirmation(ConfirmationEvent),
    /// Payload that could not be decoded. `sequence` is None when even the
    /// ordering field was unreadable.
    Malformed {
        sequence: Option<u64>,
        reason: String,
    },
}

impl FeedEvent {
    pub fn sequence(&self) -> Option<u64> {
        match self {
            FeedEvent::Confirmation(event) => Some(event.sequence),
            FeedEvent::Malformed { sequence, .. } => *sequence,
        }
    }
}

impl From<ConfirmationEvent> for FeedEvent {
    fn from(event: ConfirmationEvent) -> Self {
        FeedEvent::Confirmation(event)
    }
}

/// Settlement intent handed to the ledger collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementIntent {
    pub instruction_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub value_date: NaiveDate,
    pub ordering_institution: Option<String>,
    pub beneficiary: Option<String>,
}

/// Derive the bytes32 instruction key from a transaction reference.
///
/// The reference bytes are right-padded with zeros to 32 bytes and hex encoded.
/// Returns None when the reference does not fit.
pub fn instruction_id_for_reference(reference: &str) -> Option<String> {
    let bytes = reference.as_bytes();
    if bytes.len() > 32 {
        return None;
    }

    let mut key = [0u8; 32];
    key[..bytes.len()].copy_from_slice(bytes);
    Some(hex::encode(key))
}

/// Normalize an instruction id received from the ledger
pub fn normalize_instruction_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}
