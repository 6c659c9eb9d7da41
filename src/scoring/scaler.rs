use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;
use crate::error::ScoringError;

/// Fitted mean/variance scaler: `(x - mean) / scale` per feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ScalerArtifact {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.mean.len() != FEATURE_COUNT || self.scale.len() != FEATURE_COUNT {
            return Err(ScoringError::InvalidArtifact(format!(
                "scaler expects {} features, got mean={} scale={}",
                FEATURE_COUNT,
                self.mean.len(),
                self.scale.len()
            )));
        }

        if let Some(idx) = self
            .scale
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(ScoringError::InvalidArtifact(format!(
                "scaler has unusable scale at feature {}",
                idx
            )));
        }

        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(ScoringError::InvalidArtifact(
                "scaler mean is not finite".to_string(),
            ));
        }

        Ok(())
    }

    pub fn transform(&self, values: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut scaled = [0.0; FEATURE_COUNT];
        for (i, value) in values.iter().enumerate() {
            scaled[i] = (value - self.mean[i]) / self.scale[i];
        }
        scaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform() {
        let scaler = ScalerArtifact {
            mean: vec![0.0, 60.0, 50_000.0, 0.2],
            scale: vec![2.0, 20.0, 10_000.0, 0.5],
        };
        scaler.validate().unwrap();

        let scaled = scaler.transform(&[1.0, 80.0, 30_000.0, 0.2]);
        assert_eq!(scaled, [0.5, 1.0, -2.0, 0.0]);
    }

    #[test]
    fn test_rejects_wrong_dimensions_and_zero_scale() {
        let short = ScalerArtifact {
            mean: vec![0.0; 3],
            scale: vec![1.0; 3],
        };
        assert!(matches!(short.validate(), Err(ScoringError::InvalidArtifact(_))));

        let zero = ScalerArtifact {
            mean: vec![0.0; 4],
            scale: vec![1.0, 0.0, 1.0, 1.0],
        };
        assert!(matches!(zero.validate(), Err(ScoringError::InvalidArtifact(_))));
    }
}
