// Anomaly scoring for reconciled settlement records
pub mod features;
pub mod forest;
pub mod scaler;

pub use features::{FeatureValue, FeatureVector, SettlementTelemetry};
pub use forest::ForestArtifact;
pub use scaler::ScalerArtifact;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ScoringError;
use crate::ledger::models::{InstructionRecord, SettlementStatus};

/// Scorer output for one reconciled record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub instruction_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub expected_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub onchain_amount: Decimal,
    pub status: SettlementStatus,
    pub is_anomaly: bool,
    /// Lower is more anomalous; negative values are outliers
    pub anomaly_score: f64,
}

/// Immutable fitted scaler + forest pair
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifacts {
    scaler: ScalerArtifact,
    forest: ForestArtifact,
}

impl ModelArtifacts {
    pub fn new(scaler: ScalerArtifact, forest: ForestArtifact) -> Result<Self, ScoringError> {
        scaler.validate()?;
        forest.validate()?;
        Ok(Self { scaler, forest })
    }

    /// Load both artifacts from JSON files.
    ///
    /// A missing or unreadable file is `ModelUnavailable`; a file that parses
    /// but fails validation is `InvalidArtifact`.
    pub fn load(model_path: &Path, scaler_path: &Path) -> Result<Self, ScoringError> {
        let scaler: ScalerArtifact = read_json(scaler_path)?;
        let forest: ForestArtifact = read_json(model_path)?;
        Self::new(scaler, forest)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ScoringError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ScoringError::ModelUnavailable(format!("{}: {}", path.display(), e)))?;

    serde_json::from_str(&raw)
        .map_err(|e| ScoringError::InvalidArtifact(format!("{}: {}", path.display(), e)))
}

/// Anomaly scorer. Constructed without artifacts it stays usable but every
/// call reports `ModelUnavailable`.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    artifacts: Option<Arc<ModelArtifacts>>,
}

impl AnomalyScorer {
    pub fn new(artifacts: ModelArtifacts) -> Self {
        Self {
            artifacts: Some(Arc::new(artifacts)),
        }
    }

    pub fn unavailable() -> Self {
        Self { artifacts: None }
    }

    /// Load artifacts from disk, degrading to an unavailable scorer on failure
    pub fn from_paths(model_path: &Path, scaler_path: &Path) -> Self {
        match ModelArtifacts::load(model_path, scaler_path) {
            Ok(artifacts) => {
                info!(
                    "✅ Anomaly model loaded: {} trees from {}",
                    artifacts.forest.trees.len(),
                    model_path.display()
                );
                Self::new(artifacts)
            }
            Err(e) => {
                warn!("⚠️  Anomaly model not loaded, scoring disabled: {}", e);
                Self::unavailable()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.artifacts.is_some()
    }

    /// Score a reconciled record
    pub fn score(
        &self,
        record: &InstructionRecord,
        telemetry: &SettlementTelemetry,
    ) -> Result<AnomalyVerdict, ScoringError> {
        let artifacts = self.artifacts.as_ref().ok_or_else(|| {
            ScoringError::ModelUnavailable("no model artifacts loaded".to_string())
        })?;

        let features = FeatureVector::from_record(record, telemetry)?;
        let placeholders = features.placeholders();
        if !placeholders.is_empty() {
            debug!(
                "Scoring {} with placeholder features: {:?}",
                record.instruction_id, placeholders
            );
        }

        let scaled = artifacts.scaler.transform(&features.values());
        let anomaly_score = artifacts.forest.decision_function(&scaled);

        Ok(AnomalyVerdict {
            instruction_id: record.instruction_id.clone(),
            expected_amount: record.expected_amount,
            // from_record already rejected records without an on-chain amount
            onchain_amount: record.onchain_amount.unwrap_or_default(),
            status: record.status,
            is_anomaly: anomaly_score < 0.0,
            anomaly_score,
        })
    }
}
