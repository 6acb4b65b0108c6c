use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_RESIZE: u32 = 32;
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 90.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Feature weights must sum to 1.0 (got {sum})")]
    WeightConfigurationInvalid { sum: f64 },

    #[error("Resize must be greater than 1 (got {resize})")]
    InvalidResize { resize: u32 },

    #[error("Similarity threshold must be within 0..=100 (got {threshold})")]
    InvalidThreshold { threshold: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Combination weights for the four per-feature similarities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub perceptual: f64,
    pub difference: f64,
    pub color: f64,
    pub edge: f64,
}

impl FeatureWeights {
    pub const DEFAULT: FeatureWeights = FeatureWeights {
        perceptual: 0.35,
        difference: 0.25,
        color: 0.20,
        edge: 0.20,
    };

    pub fn sum(&self) -> f64 {
        self.perceptual + self.difference + self.color + self.edge
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [self.perceptual, self.difference, self.color, self.edge];
        let sum = self.sum();
        let well_formed = weights.iter().all(|w| w.is_finite() && *w >= 0.0);

        if !well_formed || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightConfigurationInvalid { sum });
        }
        Ok(())
    }
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Settings shared by every extraction and comparison within one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Side length of the square thumbnail every image is stretched to.
    pub resize: u32,
    /// Candidates must score strictly above this percentage to match.
    pub threshold_percent: f64,
    pub weights: FeatureWeights,
}

impl SimilarityConfig {
    pub fn new(resize: u32, threshold_percent: f64) -> Self {
        Self {
            resize,
            threshold_percent,
            weights: FeatureWeights::DEFAULT,
        }
    }

    pub fn with_weights(mut self, weights: FeatureWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Load a config from a JSON file. Missing fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: SimilarityConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resize <= 1 {
            return Err(ConfigError::InvalidResize {
                resize: self.resize,
            });
        }

        if !self.threshold_percent.is_finite() || !(0.0..=100.0).contains(&self.threshold_percent)
        {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.threshold_percent,
            });
        }

        self.weights.validate()
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RESIZE, DEFAULT_THRESHOLD_PERCENT)
    }
}
