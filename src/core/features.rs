//! Perceptual fingerprints.
//!
//! An [`ImageFeatureSet`] bundles four independent features computed from the
//! thumbnails of a single decode:
//!
//! - a mean-threshold hash of the grayscale thumbnail,
//! - a horizontal difference hash of the same thumbnail,
//! - a normalized 8×8×8 RGB histogram,
//! - a mean-threshold hash of the Laplacian edge map.

use crate::core::raster::{DecodeError, ImageRaster, RasterSource, Thumbnails};
use image::{GrayImage, Luma, RgbImage};
use serde::{Serialize, Serializer};
use std::path::Path;
use thiserror::Error;

pub const HISTOGRAM_BINS_PER_CHANNEL: usize = 8;
pub const HISTOGRAM_BINS: usize =
    HISTOGRAM_BINS_PER_CHANNEL * HISTOGRAM_BINS_PER_CHANNEL * HISTOGRAM_BINS_PER_CHANNEL;
const HISTOGRAM_BIN_WIDTH: u8 = 32;

const LAPLACIAN_KERNEL: [[i32; 3]; 3] = [[-1, -1, -1], [-1, 8, -1], [-1, -1, -1]];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Resize must be greater than 1 (got {resize})")]
    InvalidResize { resize: u32 },

    #[error("Thumbnail is {actual}px, expected {expected}px")]
    SizeMismatch { expected: u32, actual: u32 },

    #[error("Extraction aborted: {reason}")]
    Aborted { reason: String },
}

/// Fixed-length sequence of bits, packed into 64-bit words.
///
/// Bits past `len` in the last word are always zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitHash {
    words: Vec<u64>,
    len: usize,
}

impl BitHash {
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut words = Vec::new();
        let mut len = 0;

        for bit in bits {
            if len % 64 == 0 {
                words.push(0);
            }
            if bit {
                if let Some(word) = words.last_mut() {
                    *word |= 1u64 << (len % 64);
                }
            }
            len += 1;
        }

        Self { words, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some((self.words[index / 64] >> (index % 64)) & 1 == 1)
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| (self.words[i / 64] >> (i % 64)) & 1 == 1)
    }

    /// Hex rendering, four bits per digit in bit order (first bit is the
    /// most significant bit of the first digit).
    pub fn to_hex(&self) -> String {
        let bits: Vec<bool> = self.iter().collect();
        bits.chunks(4)
            .map(|nibble| {
                let value = nibble
                    .iter()
                    .enumerate()
                    .fold(0u32, |acc, (i, &bit)| acc | (u32::from(bit) << (3 - i)));
                char::from_digit(value, 16).unwrap_or('0')
            })
            .collect()
    }
}

impl Serialize for BitHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Fingerprint of one image. Only built from a complete set of thumbnails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageFeatureSet {
    perceptual_hash: BitHash,
    difference_hash: BitHash,
    color_histogram: Vec<f64>,
    edge_hash: BitHash,
}

impl ImageFeatureSet {
    pub fn from_thumbnails(thumbnails: &Thumbnails) -> Self {
        Self {
            perceptual_hash: perceptual_hash(&thumbnails.gray),
            difference_hash: difference_hash(&thumbnails.gray),
            color_histogram: color_histogram(&thumbnails.rgb),
            edge_hash: edge_hash(&thumbnails.gray),
        }
    }

    pub fn perceptual_hash(&self) -> &BitHash {
        &self.perceptual_hash
    }

    pub fn difference_hash(&self) -> &BitHash {
        &self.difference_hash
    }

    pub fn color_histogram(&self) -> &[f64] {
        &self.color_histogram
    }

    pub fn edge_hash(&self) -> &BitHash {
        &self.edge_hash
    }
}

/// One bit per pixel, row-major: set when the pixel is at or above the mean.
pub fn perceptual_hash(gray: &GrayImage) -> BitHash {
    let pixel_count = (gray.width() * gray.height()) as usize;
    if pixel_count == 0 {
        return BitHash::from_bits(std::iter::empty());
    }

    let total: u64 = gray.pixels().map(|p| u64::from(p[0])).sum();
    let mean = total as f64 / pixel_count as f64;

    BitHash::from_bits(gray.pixels().map(|p| f64::from(p[0]) >= mean))
}

/// Row-major comparison of each pixel with its right neighbour; the last
/// column only serves as a neighbour, giving `width - 1` bits per row.
pub fn difference_hash(gray: &GrayImage) -> BitHash {
    let (width, height) = gray.dimensions();

    BitHash::from_bits((0..height).flat_map(move |y| {
        (0..width.saturating_sub(1))
            .map(move |x| gray.get_pixel(x, y)[0] > gray.get_pixel(x + 1, y)[0])
    }))
}

/// 8×8×8 RGB histogram; each bin holds the fraction of pixels that fall in it.
pub fn color_histogram(rgb: &RgbImage) -> Vec<f64> {
    let mut bins = vec![0.0; HISTOGRAM_BINS];
    let pixel_count = (rgb.width() * rgb.height()) as usize;
    if pixel_count == 0 {
        return bins;
    }

    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0.map(|c| usize::from(c / HISTOGRAM_BIN_WIDTH));
        bins[r * HISTOGRAM_BINS_PER_CHANNEL * HISTOGRAM_BINS_PER_CHANNEL
            + g * HISTOGRAM_BINS_PER_CHANNEL
            + b] += 1.0;
    }

    let total = pixel_count as f64;
    for bin in bins.iter_mut() {
        *bin /= total;
    }
    bins
}

/// 3×3 Laplacian response. Neighbours outside the image repeat the nearest
/// edge pixel; responses are clamped into `0..=255`.
pub fn laplacian_edges(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let sample = |x: i64, y: i64| -> i32 {
        let cx = x.clamp(0, i64::from(width) - 1) as u32;
        let cy = y.clamp(0, i64::from(height) - 1) as u32;
        i32::from(gray.get_pixel(cx, cy)[0])
    };

    GrayImage::from_fn(width, height, |x, y| {
        let mut response = 0;
        for (ky, row) in LAPLACIAN_KERNEL.iter().enumerate() {
            for (kx, weight) in row.iter().enumerate() {
                response +=
                    weight * sample(i64::from(x) + kx as i64 - 1, i64::from(y) + ky as i64 - 1);
            }
        }
        Luma([response.clamp(0, 255) as u8])
    })
}

/// Stretch the intensity range to `0..=255`. Flat buffers are left as is.
pub fn normalize_range(gray: &mut GrayImage) {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if min >= max {
        return;
    }

    let span = f64::from(max - min);
    for pixel in gray.pixels_mut() {
        let stretched = f64::from(pixel[0] - min) * 255.0 / span;
        pixel[0] = stretched.round() as u8;
    }
}

/// Mean-threshold hash of the normalized Laplacian edge map.
pub fn edge_hash(gray: &GrayImage) -> BitHash {
    let mut edges = laplacian_edges(gray);
    normalize_range(&mut edges);
    perceptual_hash(&edges)
}

/// Decodes images and turns them into feature sets of a fixed thumbnail size.
#[derive(Debug, Clone)]
pub struct FeatureExtractor<R = ImageRaster> {
    raster: R,
    resize: u32,
}

impl FeatureExtractor<ImageRaster> {
    pub fn new(resize: u32) -> Self {
        Self::with_raster(ImageRaster::new(), resize)
    }
}

impl<R: RasterSource> FeatureExtractor<R> {
    pub fn with_raster(raster: R, resize: u32) -> Self {
        Self { raster, resize }
    }

    pub fn resize(&self) -> u32 {
        self.resize
    }

    pub fn extract(&self, path: &Path) -> Result<ImageFeatureSet, ExtractionError> {
        if self.resize <= 1 {
            return Err(ExtractionError::InvalidResize {
                resize: self.resize,
            });
        }

        let thumbnails = self.raster.decode_thumbnails(path, self.resize)?;
        self.extract_thumbnails(&thumbnails)
    }

    pub fn extract_thumbnails(
        &self,
        thumbnails: &Thumbnails,
    ) -> Result<ImageFeatureSet, ExtractionError> {
        let expected = (self.resize, self.resize);
        if thumbnails.gray.dimensions() != expected || thumbnails.rgb.dimensions() != expected {
            return Err(ExtractionError::SizeMismatch {
                expected: self.resize,
                actual: thumbnails.size(),
            });
        }

        Ok(ImageFeatureSet::from_thumbnails(thumbnails))
    }
}
