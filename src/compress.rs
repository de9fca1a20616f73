//! Size-bounded JPEG recompression.
//!
//! Qualities are tried from high to low in fixed steps and the first encoding
//! whose size in KiB fits the budget wins. If none does, the floor-quality
//! encoding is returned anyway: the budget is a target, not a guarantee.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageResult};
use std::fs;
use std::path::Path;

use crate::error::PrepError;

pub const START_QUALITY: u8 = 95;
pub const MIN_QUALITY: u8 = 20;
pub const QUALITY_STEP: u8 = 5;

/// An encoded image and the quality it was produced at
#[derive(Debug, Clone)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub within_budget: bool,
}

/// Encode `image` as JPEG at a fixed quality.
///
/// JPEG has no alpha channel, so color images are flattened to RGB and
/// grayscale ones to luma before encoding.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let flattened = if image.color().has_color() {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        DynamicImage::ImageLuma8(image.to_luma8())
    };
    let mut buf = Vec::new();
    flattened.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

/// Find the highest quality in the ladder whose output fits `max_kb` KiB
pub fn compress_to_budget(image: &DynamicImage, max_kb: u64) -> ImageResult<Compressed> {
    let mut quality = START_QUALITY;
    loop {
        let bytes = encode_jpeg(image, quality)?;
        let size_kb = (bytes.len() / 1024) as u64;
        if size_kb <= max_kb {
            return Ok(Compressed {
                bytes,
                quality,
                within_budget: true,
            });
        }
        if quality < MIN_QUALITY + QUALITY_STEP {
            return Ok(Compressed {
                bytes,
                quality,
                within_budget: false,
            });
        }
        quality -= QUALITY_STEP;
    }
}

/// Compress `image` under the budget and write it to `dest`
pub fn compress_to_file(image: &DynamicImage, dest: &Path, max_kb: u64) -> Result<u8, PrepError> {
    let compressed = compress_to_budget(image, max_kb).map_err(|source| PrepError::Encode {
        path: dest.to_path_buf(),
        source,
    })?;
    if !compressed.within_budget {
        log::debug!(
            "{} is {} KiB at floor quality {}, over the {} KiB budget",
            dest.display(),
            compressed.bytes.len() / 1024,
            compressed.quality,
            max_kb
        );
    }
    fs::write(dest, &compressed.bytes).map_err(|source| PrepError::Write {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(compressed.quality)
}
