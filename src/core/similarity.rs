use crate::core::config::{ConfigError, FeatureWeights};
use crate::core::features::{BitHash, ImageFeatureSet};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Cannot compare {feature} of length {left} with length {right}")]
    DimensionMismatch {
        feature: &'static str,
        left: usize,
        right: usize,
    },
}

/// Number of positions at which `x` and `y` differ.
pub fn hamming_distance(x: &BitHash, y: &BitHash) -> Result<u32, ScoreError> {
    ensure_same_length("hash", x.len(), y.len())?;

    Ok(x.words()
        .iter()
        .zip(y.words())
        .map(|(a, b)| (a ^ b).count_ones())
        .sum())
}

/// `100 × (1 − hamming / length)`.
pub fn hash_similarity(x: &BitHash, y: &BitHash) -> Result<f64, ScoreError> {
    let distance = hamming_distance(x, y)?;
    if x.is_empty() {
        return Ok(100.0);
    }
    Ok(100.0 * (1.0 - f64::from(distance) / x.len() as f64))
}

/// Chi-square distance mapped through `100 × e^(−d/2)`. Bins that are empty
/// in both histograms are skipped.
pub fn histogram_similarity(h1: &[f64], h2: &[f64]) -> Result<f64, ScoreError> {
    ensure_same_length("color histogram", h1.len(), h2.len())?;

    let distance: f64 = h1
        .iter()
        .zip(h2)
        .filter(|(a, b)| *a + *b != 0.0)
        .map(|(a, b)| (a - b).powi(2) / (a + b))
        .sum();

    Ok(100.0 * (-distance / 2.0).exp())
}

fn ensure_same_length(feature: &'static str, left: usize, right: usize) -> Result<(), ScoreError> {
    if left != right {
        return Err(ScoreError::DimensionMismatch {
            feature,
            left,
            right,
        });
    }
    Ok(())
}

/// Per-feature similarities and their weighted combination, all in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityBreakdown {
    pub perceptual: f64,
    pub difference: f64,
    pub color: f64,
    pub edge: f64,
    pub combined: f64,
}

/// Weighted comparison of two feature sets.
///
/// Weights are validated once in [`SimilarityScorer::new`]; scoring never
/// re-checks them.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    weights: FeatureWeights,
}

impl SimilarityScorer {
    pub fn new(weights: FeatureWeights) -> Result<Self, ConfigError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &FeatureWeights {
        &self.weights
    }

    pub fn score(&self, a: &ImageFeatureSet, b: &ImageFeatureSet) -> Result<f64, ScoreError> {
        Ok(self.breakdown(a, b)?.combined)
    }

    pub fn breakdown(
        &self,
        a: &ImageFeatureSet,
        b: &ImageFeatureSet,
    ) -> Result<SimilarityBreakdown, ScoreError> {
        let perceptual = hash_similarity(a.perceptual_hash(), b.perceptual_hash())
            .map_err(|e| rename_feature(e, "perceptual hash"))?;
        let difference = hash_similarity(a.difference_hash(), b.difference_hash())
            .map_err(|e| rename_feature(e, "difference hash"))?;
        let color = histogram_similarity(a.color_histogram(), b.color_histogram())?;
        let edge = hash_similarity(a.edge_hash(), b.edge_hash())
            .map_err(|e| rename_feature(e, "edge hash"))?;

        let w = &self.weights;
        let combined = w.perceptual * perceptual
            + w.difference * difference
            + w.color * color
            + w.edge * edge;

        Ok(SimilarityBreakdown {
            perceptual,
            difference,
            color,
            edge,
            // Rounding in the weighted sum may overshoot by an ulp
            combined: combined.clamp(0.0, 100.0),
        })
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self {
            weights: FeatureWeights::DEFAULT,
        }
    }
}

fn rename_feature(err: ScoreError, feature: &'static str) -> ScoreError {
    match err {
        ScoreError::DimensionMismatch { left, right, .. } => ScoreError::DimensionMismatch {
            feature,
            left,
            right,
        },
    }
}
