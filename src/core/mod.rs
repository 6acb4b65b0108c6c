pub mod config;
pub mod discovery;
pub mod features;
pub mod raster;
pub mod ranker;
pub mod similarity;

pub use config::{ConfigError, FeatureWeights, SimilarityConfig};
pub use discovery::{CandidateDiscovery, DiscoveryError};
pub use features::{BitHash, ExtractionError, FeatureExtractor, ImageFeatureSet};
pub use raster::{DecodeError, ImageRaster, RasterSource, Thumbnails};
pub use ranker::{
    CancellationToken, CandidateStatus, RankError, RankOutcome, RankProgress, SimilarityRanker,
    SimilarityResult, SkippedCandidate,
};
pub use similarity::{ScoreError, SimilarityBreakdown, SimilarityScorer};
