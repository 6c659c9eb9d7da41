use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;
use crate::error::ScoringError;

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Node of a fitted isolation tree, stored as a flat array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// Go left iff `x[feature] <= threshold`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Number of training samples that reached this leaf
    Leaf { samples: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<TreeNode>,
}

impl IsolationTree {
    fn validate(&self, tree_idx: usize) -> Result<(), ScoringError> {
        if self.nodes.is_empty() {
            return Err(ScoringError::InvalidArtifact(format!("tree {} is empty", tree_idx)));
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                // Children strictly after their parent keeps every walk finite
                let children_ok = *left > idx
                    && *right > idx
                    && *left < self.nodes.len()
                    && *right < self.nodes.len();

                if *feature >= FEATURE_COUNT || !children_ok || threshold.is_nan() {
                    return Err(ScoringError::InvalidArtifact(format!(
                        "tree {} node {} is malformed",
                        tree_idx, idx
                    )));
                }
            }
        }

        Ok(())
    }

    /// Depth at which `x` is isolated, adjusted for the leaf's remaining samples
    fn path_length(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;

        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                TreeNode::Leaf { samples } => return depth + average_path_length(*samples),
            }
        }
    }
}

/// Fitted isolation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestArtifact {
    /// Sub-sample size each tree was grown on
    pub max_samples: usize,
    /// Threshold subtracted from the raw score; decisions below zero are outliers
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

impl ForestArtifact {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.trees.is_empty() {
            return Err(ScoringError::InvalidArtifact("forest has no trees".to_string()));
        }
        if self.max_samples < 2 {
            return Err(ScoringError::InvalidArtifact(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        if !self.offset.is_finite() {
            return Err(ScoringError::InvalidArtifact("offset is not finite".to_string()));
        }

        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(idx)?;
        }
        Ok(())
    }

    /// Raw anomaly score in [-1, 0); closer to -1 is more anomalous
    pub fn score_samples(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
            / self.trees.len() as f64;

        -(2f64.powf(-mean_path / average_path_length(self.max_samples)))
    }

    /// Score relative to the fitted threshold; negative means outlier
    pub fn decision_function(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        self.score_samples(x) - self.offset
    }
}

/// Average path length of an unsuccessful binary-search-tree lookup over `n` samples
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
