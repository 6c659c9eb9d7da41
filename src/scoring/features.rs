use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::error::ScoringError;
use crate::ledger::models::{ConfirmationEvent, InstructionRecord};

/// Number of features fed to the scaler and forest
pub const FEATURE_COUNT: usize = 4;

/// Feature order expected by the fitted artifacts
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "amount_diff",
    "time_to_settlement",
    "resource_cost",
    "value_date_delay",
];

/// Stand-in values used when telemetry is missing. Scores built on them are
/// not measurements; the verdict still counts them as placeholders.
pub const PLACEHOLDER_TIME_TO_SETTLEMENT_SECS: f64 = 60.0;
pub const PLACEHOLDER_RESOURCE_COST: f64 = 50_000.0;

/// A single feature value, tagged with where it came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "source", content = "value", rename_all = "lowercase")]
pub enum FeatureValue {
    Measured(f64),
    Placeholder(f64),
}

impl FeatureValue {
    pub fn value(&self) -> f64 {
        match self {
            FeatureValue::Measured(v) | FeatureValue::Placeholder(v) => *v,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, FeatureValue::Placeholder(_))
    }

    fn measured_or(value: Option<f64>, default: f64) -> Self {
        match value {
            Some(v) if v.is_finite() => FeatureValue::Measured(v),
            _ => FeatureValue::Placeholder(default),
        }
    }
}

/// Telemetry reported alongside a settlement
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SettlementTelemetry {
    pub resource_cost: Option<u64>,
}

impl From<&ConfirmationEvent> for SettlementTelemetry {
    fn from(event: &ConfirmationEvent) -> Self {
        Self {
            resource_cost: event.resource_cost,
        }
    }
}

/// Feature vector for one reconciled record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub amount_diff: FeatureValue,
    pub time_to_settlement: FeatureValue,
    pub resource_cost: FeatureValue,
    pub value_date_delay: FeatureValue,
}

impl FeatureVector {
    /// Build features from a settled record. Pending records cannot be scored.
    pub fn from_record(
        record: &InstructionRecord,
        telemetry: &SettlementTelemetry,
    ) -> Result<Self, ScoringError> {
        let onchain = match (record.status.is_terminal(), record.onchain_amount) {
            (true, Some(amount)) => amount,
            _ => return Err(ScoringError::NotReconciled(record.instruction_id.clone())),
        };

        let amount_diff = (record.expected_amount - onchain)
            .abs()
            .to_f64()
            .unwrap_or(f64::MAX);

        let elapsed = record.updated_at - record.created_at;
        let time_to_settlement = (elapsed >= chrono::Duration::zero())
            .then(|| elapsed.num_milliseconds() as f64 / 1000.0);

        let delay_days = (record.updated_at.date_naive() - record.value_date).num_days().max(0);

        Ok(Self {
            amount_diff: FeatureValue::Measured(amount_diff),
            time_to_settlement: FeatureValue::measured_or(
                time_to_settlement,
                PLACEHOLDER_TIME_TO_SETTLEMENT_SECS,
            ),
            resource_cost: FeatureValue::measured_or(
                telemetry.resource_cost.map(|c| c as f64),
                PLACEHOLDER_RESOURCE_COST,
            ),
            value_date_delay: FeatureValue::Measured(delay_days as f64),
        })
    }

    /// Raw values in [`FEATURE_NAMES`] order
    pub fn values(&self) -> [f64; FEATURE_COUNT] {
        [
            self.amount_diff.value(),
            self.time_to_settlement.value(),
            self.resource_cost.value(),
            self.value_date_delay.value(),
        ]
    }

    /// Names of the features that fell back to placeholders
    pub fn placeholders(&self) -> Vec<&'static str> {
        [
            &self.amount_diff,
            &self.time_to_settlement,
            &self.resource_cost,
            &self.value_date_delay,
        ]
        .iter()
        .zip(FEATURE_NAMES)
        .filter(|(value, _)| value.is_placeholder())
        .map(|(_, name)| name)
        .collect()
    }
}
