use image::{imageops::FilterType, DynamicImage, GrayImage, ImageReader, RgbImage};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid thumbnail size: {size}")]
    InvalidSize { size: u32 },
}

/// Square thumbnails derived from a single decode of one image.
#[derive(Debug, Clone)]
pub struct Thumbnails {
    pub gray: GrayImage,
    pub rgb: RgbImage,
}

impl Thumbnails {
    /// Stretch `img` to `size × size` (aspect ratio is not preserved) and
    /// derive the grayscale and RGB buffers from the same resized image.
    /// Any alpha channel is dropped.
    pub fn from_image(img: &DynamicImage, size: u32, filter: FilterType) -> Result<Self, DecodeError> {
        if size == 0 {
            return Err(DecodeError::InvalidSize { size });
        }

        let resized = img.resize_exact(size, size, filter);
        Ok(Self {
            gray: resized.to_luma8(),
            rgb: resized.to_rgb8(),
        })
    }

    pub fn size(&self) -> u32 {
        self.gray.width()
    }
}

/// Decodes an image file into fixed-size thumbnails.
pub trait RasterSource: Send + Sync {
    fn decode_thumbnails(&self, path: &Path, size: u32) -> Result<Thumbnails, DecodeError>;
}

/// `RasterSource` backed by the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct ImageRaster {
    filter: FilterType,
}

impl ImageRaster {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    fn load_image(&self, path: &Path) -> Result<DynamicImage, DecodeError> {
        // Content sniffing first, so a mislabelled extension still decodes
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(img)
    }
}

impl Default for ImageRaster {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterSource for ImageRaster {
    fn decode_thumbnails(&self, path: &Path, size: u32) -> Result<Thumbnails, DecodeError> {
        let img = self.load_image(path)?;
        Thumbnails::from_image(&img, size, self.filter)
    }
}
