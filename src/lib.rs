//! Perceptual image similarity search.
//!
//! Each image is reduced to an [`ImageFeatureSet`] (mean hash, difference
//! hash, color histogram and edge hash of a square thumbnail). Feature sets
//! are compared with a weighted [`SimilarityScorer`], and a
//! [`SimilarityRanker`] scores a corpus against one reference image.

pub mod core;

pub use crate::core::{
    CancellationToken, FeatureExtractor, ImageFeatureSet, RankOutcome, SimilarityConfig,
    SimilarityRanker, SimilarityResult, SimilarityScorer,
};
