use crate::core::config::{ConfigError, SimilarityConfig};
use crate::core::features::{ExtractionError, FeatureExtractor, ImageFeatureSet};
use crate::core::raster::{ImageRaster, RasterSource};
use crate::core::similarity::{ScoreError, SimilarityScorer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("Could not process reference image {}: {source}", .path.display())]
    ReferenceUnprocessable {
        path: PathBuf,
        #[source]
        source: ExtractionError,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Scoring failed: {0}")]
    Score(#[from] ScoreError),
}

/// Cooperative cancellation flag shared between a search and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub path: PathBuf,
    pub similarity_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedCandidate {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CandidateStatus {
    Matched(f64),
    BelowThreshold(f64),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RankProgress {
    pub processed: usize,
    pub total: usize,
    pub current_file: PathBuf,
    pub status: CandidateStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankOutcome {
    /// Sorted by similarity, highest first; equal scores keep input order.
    pub matches: Vec<SimilarityResult>,
    pub skipped: Vec<SkippedCandidate>,
    pub processed: usize,
    pub total: usize,
    pub cancelled: bool,
}

impl RankOutcome {
    /// False when the search stopped early and `matches` covers only part of
    /// the corpus.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.processed == self.total
    }
}

/// Ranks a corpus of candidate images against one reference image.
pub struct SimilarityRanker<R = ImageRaster> {
    config: SimilarityConfig,
    extractor: Arc<FeatureExtractor<R>>,
    scorer: SimilarityScorer,
    progress_sender: Option<mpsc::UnboundedSender<RankProgress>>,
}

impl SimilarityRanker<ImageRaster> {
    pub fn new(config: SimilarityConfig) -> Result<Self, ConfigError> {
        Self::with_raster(ImageRaster::new(), config)
    }
}

impl<R: RasterSource + 'static> SimilarityRanker<R> {
    pub fn with_raster(raster: R, config: SimilarityConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            extractor: Arc::new(FeatureExtractor::with_raster(raster, config.resize)),
            scorer: SimilarityScorer::new(config.weights)?,
            config,
            progress_sender: None,
        })
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<RankProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Score every candidate against `reference` and keep those strictly
    /// above the configured threshold.
    ///
    /// Candidates are processed one at a time in input order. Candidates that
    /// fail to decode are reported in `skipped` and do not stop the search.
    /// Cancellation is checked before each candidate; a cancelled search
    /// returns what it has matched so far.
    pub async fn rank(
        &self,
        reference: &Path,
        candidates: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<RankOutcome, RankError> {
        let reference_features =
            self.extract(reference)
                .await
                .map_err(|source| RankError::ReferenceUnprocessable {
                    path: reference.to_path_buf(),
                    source,
                })?;

        let total = candidates.len();
        log::info!(
            "Comparing {} candidate(s) against {}",
            total,
            reference.display()
        );

        let mut matches = Vec::new();
        let mut skipped = Vec::new();
        let mut processed = 0;
        let mut cancelled = false;

        for candidate in candidates {
            if cancel.is_cancelled() {
                log::info!("Search cancelled after {}/{} candidates", processed, total);
                cancelled = true;
                break;
            }

            let status = match self.extract(candidate).await {
                Ok(features) => {
                    let score = self.scorer.score(&reference_features, &features)?;
                    log::debug!("{} scored {:.2}%", candidate.display(), score);

                    if score > self.config.threshold_percent {
                        matches.push(SimilarityResult {
                            path: candidate.clone(),
                            similarity_percent: score,
                        });
                        CandidateStatus::Matched(score)
                    } else {
                        CandidateStatus::BelowThreshold(score)
                    }
                }
                Err(e) => {
                    log::warn!("Skipping {}: {}", candidate.display(), e);
                    skipped.push(SkippedCandidate {
                        path: candidate.clone(),
                        reason: e.to_string(),
                    });
                    CandidateStatus::Skipped(e.to_string())
                }
            };

            processed += 1;
            self.send_progress(RankProgress {
                processed,
                total,
                current_file: candidate.clone(),
                status,
            });
        }

        // Stable, so equal scores keep their input order
        matches.sort_by(|a, b| b.similarity_percent.total_cmp(&a.similarity_percent));

        log::info!(
            "Found {} match(es), skipped {} of {} candidate(s)",
            matches.len(),
            skipped.len(),
            total
        );

        Ok(RankOutcome {
            matches,
            skipped,
            processed,
            total,
            cancelled,
        })
    }

    /// Feature set of a single image, decoded off the async runtime.
    pub async fn extract(&self, path: &Path) -> Result<ImageFeatureSet, ExtractionError> {
        let extractor = Arc::clone(&self.extractor);
        let owned_path = path.to_path_buf();

        match tokio::task::spawn_blocking(move || extractor.extract(&owned_path)).await {
            Ok(result) => result,
            Err(e) => Err(ExtractionError::Aborted {
                reason: e.to_string(),
            }),
        }
    }

    fn send_progress(&self, progress: RankProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::raster::{DecodeError, Thumbnails};
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory raster keyed by path; unknown paths fail to decode.
    #[derive(Default)]
    struct FixtureRaster {
        images: HashMap<PathBuf, Thumbnails>,
        decoded: Arc<Mutex<Vec<PathBuf>>>,
        cancel_on: Option<(PathBuf, CancellationToken)>,
    }

    impl FixtureRaster {
        fn with_image(mut self, name: &str, gray: GrayImage) -> Self {
            let rgb = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
                let v = gray.get_pixel(x, y)[0];
                Rgb([v, v, v])
            });
            self.images.insert(PathBuf::from(name), Thumbnails { gray, rgb });
            self
        }

        fn cancel_when_decoding(mut self, name: &str, token: CancellationToken) -> Self {
            self.cancel_on = Some((PathBuf::from(name), token));
            self
        }
    }

    impl RasterSource for FixtureRaster {
        fn decode_thumbnails(&self, path: &Path, _size: u32) -> Result<Thumbnails, DecodeError> {
            self.decoded.lock().unwrap().push(path.to_path_buf());
            if let Some((trigger, token)) = &self.cancel_on {
                if trigger == path {
                    token.cancel();
                }
            }
            self.images.get(path).cloned().ok_or_else(|| {
                DecodeError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    path.display().to_string(),
                ))
            })
        }
    }

    fn horizontal_gradient() -> GrayImage {
        GrayImage::from_fn(32, 32, |x, _| Luma([(x * 8) as u8]))
    }

    fn reversed_gradient() -> GrayImage {
        GrayImage::from_fn(32, 32, |x, _| Luma([(248 - x * 8) as u8]))
    }

    fn tweaked_gradient() -> GrayImage {
        let mut gray = horizontal_gradient();
        gray.put_pixel(0, 0, Luma([255]));
        gray
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x * 5 + y * 2) % 256) as u8;
            Rgb([intensity, 255 - intensity, intensity / 2])
        });
        img.save(path).unwrap();
    }

    fn create_solid_image(path: &Path, value: u8) {
        ImageBuffer::from_pixel(32, 32, Rgb([value, value, value]))
            .save(path)
            .unwrap();
    }

    #[tokio::test]
    async fn test_rank_filters_and_sorts() {
        let raster = FixtureRaster::default()
            .with_image("reference.png", horizontal_gradient())
            .with_image("black.png", GrayImage::new(32, 32))
            .with_image("tweaked.png", tweaked_gradient())
            .with_image("white.png", GrayImage::from_pixel(32, 32, Luma([255])))
            .with_image("copy.png", horizontal_gradient())
            .with_image("reversed.png", reversed_gradient());
        let ranker = SimilarityRanker::with_raster(raster, SimilarityConfig::default()).unwrap();

        let candidates = paths(&[
            "black.png",
            "tweaked.png",
            "white.png",
            "copy.png",
            "reversed.png",
        ]);
        let outcome = ranker
            .rank(
                Path::new("reference.png"),
                &candidates,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.processed, 5);
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.matches[0].path, PathBuf::from("copy.png"));
        assert!((outcome.matches[0].similarity_percent - 100.0).abs() < 1e-6);
        assert_eq!(outcome.matches[1].path, PathBuf::from("tweaked.png"));
        assert!(outcome.matches[1].similarity_percent > 90.0);
        assert!(outcome.matches[1].similarity_percent < 100.0);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_input_order() {
        let raster = FixtureRaster::default()
            .with_image("reference.png", horizontal_gradient())
            .with_image("c.png", horizontal_gradient())
            .with_image("a.png", horizontal_gradient())
            .with_image("b.png", horizontal_gradient());
        let ranker = SimilarityRanker::with_raster(raster, SimilarityConfig::default()).unwrap();

        let outcome = ranker
            .rank(
                Path::new("reference.png"),
                &paths(&["c.png", "a.png", "b.png"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let order: Vec<_> = outcome.matches.iter().map(|m| m.path.clone()).collect();
        assert_eq!(order, paths(&["c.png", "a.png", "b.png"]));
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let raster = FixtureRaster::default()
            .with_image("reference.png", horizontal_gradient())
            .with_image("copy.png", horizontal_gradient());
        let config = SimilarityConfig::new(32, 100.0);
        let ranker = SimilarityRanker::with_raster(raster, config).unwrap();

        let outcome = ranker
            .rank(
                Path::new("reference.png"),
                &paths(&["copy.png"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.matches.is_empty());
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_cancel_before_start_returns_empty() {
        let raster = FixtureRaster::default()
            .with_image("reference.png", horizontal_gradient())
            .with_image("copy.png", horizontal_gradient());
        let decoded = raster.decoded.clone();
        let ranker = SimilarityRanker::with_raster(raster, SimilarityConfig::default()).unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let outcome = ranker
            .rank(Path::new("reference.png"), &paths(&["copy.png"]), &token)
            .await
            .unwrap();

        assert!(outcome.matches.is_empty());
        assert!(outcome.cancelled);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.processed, 0);
        assert_eq!(*decoded.lock().unwrap(), paths(&["reference.png"]));
    }

    #[tokio::test]
    async fn test_cancel_stops_further_extraction() {
        let token = CancellationToken::new();
        let raster = FixtureRaster::default()
            .with_image("reference.png", horizontal_gradient())
            .with_image("first.png", horizontal_gradient())
            .with_image("second.png", horizontal_gradient())
            .with_image("third.png", horizontal_gradient())
            .cancel_when_decoding("second.png", token.clone());
        let decoded = raster.decoded.clone();
        let ranker = SimilarityRanker::with_raster(raster, SimilarityConfig::default()).unwrap();

        let outcome = ranker
            .rank(
                Path::new("reference.png"),
                &paths(&["first.png", "second.png", "third.png"]),
                &token,
            )
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(
            *decoded.lock().unwrap(),
            paths(&["reference.png", "first.png", "second.png"])
        );
    }

    #[tokio::test]
    async fn test_unreadable_candidate_is_skipped() {
        let raster = FixtureRaster::default()
            .with_image("reference.png", horizontal_gradient())
            .with_image("copy.png", horizontal_gradient());
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let ranker = SimilarityRanker::with_raster(raster, SimilarityConfig::default())
            .unwrap()
            .with_progress_sender(progress_tx);

        let outcome = ranker
            .rank(
                Path::new("reference.png"),
                &paths(&["missing.png", "copy.png"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].path, PathBuf::from("missing.png"));

        let mut events = Vec::new();
        while let Ok(event) = progress_rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].processed, events[0].total), (1, 2));
        assert!(matches!(events[0].status, CandidateStatus::Skipped(_)));
        assert_eq!((events[1].processed, events[1].total), (2, 2));
        assert!(matches!(events[1].status, CandidateStatus::Matched(_)));
    }

    #[tokio::test]
    async fn test_reference_failure_is_fatal() {
        let raster = FixtureRaster::default().with_image("copy.png", horizontal_gradient());
        let ranker = SimilarityRanker::with_raster(raster, SimilarityConfig::default()).unwrap();

        let result = ranker
            .rank(
                Path::new("missing.png"),
                &paths(&["copy.png"]),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(RankError::ReferenceUnprocessable { ref path, .. }) if path == Path::new("missing.png")
        ));
    }

    #[tokio::test]
    async fn test_empty_corpus() {
        let raster = FixtureRaster::default().with_image("reference.png", horizontal_gradient());
        let ranker = SimilarityRanker::with_raster(raster, SimilarityConfig::default()).unwrap();

        let outcome = ranker
            .rank(Path::new("reference.png"), &[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.matches.is_empty());
        assert!(outcome.is_complete());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SimilarityRanker::new(SimilarityConfig::new(1, 90.0));
        assert!(matches!(result, Err(ConfigError::InvalidResize { resize: 1 })));
    }

    #[tokio::test]
    async fn test_rank_image_files() {
        let temp_dir = TempDir::new().unwrap();
        let reference = temp_dir.path().join("reference.png");
        let copy = temp_dir.path().join("renamed copy.png");
        let corrupt = temp_dir.path().join("corrupt.png");
        create_test_image(&reference, 120, 90);
        fs::copy(&reference, &copy).unwrap();
        fs::write(&corrupt, b"not an image").unwrap();

        let ranker = SimilarityRanker::new(SimilarityConfig::default()).unwrap();
        let outcome = ranker
            .rank(
                &reference,
                &[corrupt.clone(), copy.clone()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].path, copy);
        assert!((outcome.matches[0].similarity_percent - 100.0).abs() < 1e-6);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].path, corrupt);
    }

    #[tokio::test]
    async fn test_black_and_white_files_do_not_match() {
        let temp_dir = TempDir::new().unwrap();
        let black = temp_dir.path().join("black.png");
        let white = temp_dir.path().join("white.png");
        create_solid_image(&black, 0);
        create_solid_image(&white, 255);

        let ranker = SimilarityRanker::new(SimilarityConfig::default()).unwrap();
        let a = ranker.extract(&black).await.unwrap();
        let b = ranker.extract(&white).await.unwrap();
        let breakdown = ranker.scorer().breakdown(&a, &b).unwrap();

        assert!(breakdown.perceptual > 99.0);
        assert!(breakdown.difference > 99.0);
        assert!(breakdown.edge > 99.0);
        assert!(breakdown.color < 40.0);
        assert!(breakdown.combined < 90.0);

        let outcome = ranker
            .rank(&black, &[white], &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.matches.is_empty());
        assert!(outcome.is_complete());
    }
}
