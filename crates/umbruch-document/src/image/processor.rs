// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor: classify, resize, and re-encode embedded images to fit a
// per-image byte budget.

use std::collections::{HashMap, HashSet};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use umbruch_core::{
    ConversionConfig, ImageAsset, ImageEncoding, ImageKind, PresetProfile, RawImage, Result,
    TextBlock, UmbruchError,
};

use super::association::associate;

/// Photographs have more distinct colours than this in the sample grid.
const PHOTO_COLOR_COUNT: usize = 256;
/// ... or a luminance entropy above this many bits.
const PHOTO_ENTROPY_BITS: f64 = 5.0;
/// Samples per axis when classifying.
const SAMPLE_GRID: u32 = 64;

const JPEG_QUALITY_STEP: u8 = 10;
const JPEG_QUALITY_FLOOR: u8 = 30;
const PNG_SCALE_STEP: f32 = 0.75;
/// PNGs are not shrunk below this width to meet the budget.
const PNG_MIN_WIDTH: u32 = 32;

/// Per-job image settings, derived from the preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSettings {
    pub max_width: u32,
    pub jpeg_quality: u8,
    /// Target encoded size per image.
    pub byte_budget: usize,
    /// Upper bound on decoded bytes across all images of a job.
    pub max_decoded_bytes: usize,
}

impl ImageSettings {
    pub fn from_profile(profile: &PresetProfile, config: &ConversionConfig) -> Self {
        Self {
            max_width: profile.image_max_width,
            jpeg_quality: profile.jpeg_quality,
            byte_budget: config.image_byte_budget,
            max_decoded_bytes: config.max_image_bytes,
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_width: 1200,
            jpeg_quality: 85,
            byte_budget: 300 * 1024,
            max_decoded_bytes: 512 * 1024 * 1024,
        }
    }
}

/// One image after classification and re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedImage {
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub original_bytes: usize,
}

/// Totals for a job's images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    /// Distinct images processed.
    pub count: usize,
    /// Placements that reused an already processed image.
    pub duplicates: usize,
    pub original_bytes: usize,
    pub optimized_bytes: usize,
    pub photographic: usize,
    pub diagrams: usize,
}

impl ImageStats {
    /// Optimized size as a share of the original, 1.0 when there were no images.
    pub fn compression_ratio(&self) -> f32 {
        if self.original_bytes == 0 {
            1.0
        } else {
            self.optimized_bytes as f32 / self.original_bytes as f32
        }
    }

    pub fn record(&mut self, image: &OptimizedImage) {
        self.count += 1;
        self.original_bytes += image.original_bytes;
        self.optimized_bytes += image.bytes.len();
        match image.kind {
            ImageKind::Photographic => self.photographic += 1,
            ImageKind::Diagram => self.diagrams += 1,
        }
    }
}

/// Stable asset id for an image digest.
pub fn asset_id(digest: &str) -> String {
    format!("img-{}", digest.chars().take(16).collect::<String>())
}

/// Optimizes embedded images for reflowable output.
#[derive(Debug, Clone, Default)]
pub struct ImageProcessor {
    settings: ImageSettings,
}

impl ImageProcessor {
    pub fn new(settings: ImageSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    /// Reject jobs whose distinct images would decode past the byte limit.
    pub fn check_limits(&self, images: &[RawImage]) -> Result<()> {
        let mut seen = HashSet::new();
        let decoded: usize = images
            .iter()
            .filter(|image| seen.insert(image.digest.as_str()))
            .map(|image| image.width as usize * image.height as usize * 4)
            .sum();
        if decoded > self.settings.max_decoded_bytes {
            return Err(UmbruchError::ResourceExhaustion(format!(
                "images decode to {} bytes, above the limit of {}",
                decoded, self.settings.max_decoded_bytes
            )));
        }
        Ok(())
    }

    // -- Single image ---------------------------------------------------------

    /// Decode, classify, resize, and encode one image within the byte budget.
    #[instrument(skip(self, raw), fields(page = raw.page, bytes = raw.bytes.len()))]
    pub fn optimize(&self, raw: &RawImage) -> Result<OptimizedImage> {
        let decoded = image::load_from_memory(&raw.bytes).map_err(|err| {
            UmbruchError::Image(format!("failed to decode image on page {}: {}", raw.page, err))
        })?;
        let kind = classify(&decoded);
        let resized = fit_width(decoded, self.settings.max_width);

        let (bytes, encoding, width, height) = match kind {
            ImageKind::Photographic => {
                let (bytes, quality) = self.encode_jpeg_within_budget(&resized)?;
                debug!(quality, bytes = bytes.len(), "Photograph encoded");
                (bytes, ImageEncoding::Jpeg, resized.width(), resized.height())
            }
            ImageKind::Diagram => {
                let (bytes, image) = self.encode_png_within_budget(resized)?;
                debug!(width = image.width(), bytes = bytes.len(), "Diagram encoded");
                (bytes, ImageEncoding::Png, image.width(), image.height())
            }
        };
        if bytes.len() > self.settings.byte_budget {
            warn!(
                page = raw.page,
                bytes = bytes.len(),
                budget = self.settings.byte_budget,
                "Image still exceeds its byte budget"
            );
        }
        Ok(OptimizedImage {
            bytes,
            encoding,
            kind,
            width,
            height,
            original_bytes: raw.bytes.len(),
        })
    }

    /// Start at the preset quality and step down by 10 until the budget is
    /// met or the floor of 30 is reached.
    fn encode_jpeg_within_budget(&self, image: &DynamicImage) -> Result<(Vec<u8>, u8)> {
        let mut quality = self.settings.jpeg_quality.clamp(JPEG_QUALITY_FLOOR, 100);
        loop {
            let bytes = to_jpeg_bytes(image, quality)?;
            if bytes.len() <= self.settings.byte_budget || quality <= JPEG_QUALITY_FLOOR {
                return Ok((bytes, quality));
            }
            quality = quality.saturating_sub(JPEG_QUALITY_STEP).max(JPEG_QUALITY_FLOOR);
        }
    }

    /// Shrink by 0.75 until the encoded PNG meets the budget.
    fn encode_png_within_budget(&self, mut image: DynamicImage) -> Result<(Vec<u8>, DynamicImage)> {
        loop {
            let bytes = to_png_bytes(&image)?;
            let next_width = (image.width() as f32 * PNG_SCALE_STEP) as u32;
            if bytes.len() <= self.settings.byte_budget || next_width < PNG_MIN_WIDTH {
                return Ok((bytes, image));
            }
            image = fit_width(image, next_width);
        }
    }

    // -- Whole job ------------------------------------------------------------

    /// Optimize every image once per digest and associate each placement with
    /// the text on its page.
    ///
    /// `blocks_for_page` returns a page's blocks in reading order. Images that
    /// fail to decode are skipped with a warning.
    #[instrument(skip_all, fields(images = images.len()))]
    pub fn process_all<'a>(
        &self,
        images: &[RawImage],
        blocks_for_page: impl Fn(usize) -> &'a [TextBlock],
    ) -> Result<(Vec<ImageAsset>, ImageStats)> {
        self.check_limits(images)?;

        let mut optimized: HashMap<&str, Option<OptimizedImage>> = HashMap::new();
        let mut stats = ImageStats::default();
        for raw in images {
            if optimized.contains_key(raw.digest.as_str()) {
                stats.duplicates += 1;
                continue;
            }
            let result = match self.optimize(raw) {
                Ok(image) => {
                    stats.record(&image);
                    Some(image)
                }
                Err(err) => {
                    warn!(page = raw.page, error = %err, "Skipping undecodable image");
                    None
                }
            };
            optimized.insert(raw.digest.as_str(), result);
        }

        let assets: Vec<ImageAsset> = images
            .iter()
            .filter_map(|raw| {
                let image = optimized.get(raw.digest.as_str())?.as_ref()?;
                Some(self.place(raw, image, blocks_for_page(raw.page)))
            })
            .collect();
        info!(
            assets = assets.len(),
            distinct = stats.count,
            ratio = stats.compression_ratio(),
            "Images processed"
        );
        Ok((assets, stats))
    }

    /// Build the asset for one placement of an optimized image.
    pub fn place(&self, raw: &RawImage, image: &OptimizedImage, blocks: &[TextBlock]) -> ImageAsset {
        let association = associate(&raw.bbox, blocks);
        ImageAsset {
            id: asset_id(&raw.digest),
            page: raw.page,
            bbox: raw.bbox,
            bytes: image.bytes.clone(),
            encoding: image.encoding,
            kind: image.kind,
            width: image.width,
            height: image.height,
            associated_block: association.as_ref().map(|a| a.block),
            alt_text: association.map(|a| a.alt_text),
        }
    }
}

// -- Classification -----------------------------------------------------------

/// Photographic when a sampled grid shows many colours or high luminance entropy.
pub fn classify(image: &DynamicImage) -> ImageKind {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return ImageKind::Diagram;
    }
    let step_x = (width / SAMPLE_GRID).max(1);
    let step_y = (height / SAMPLE_GRID).max(1);

    let mut colors = HashSet::new();
    let mut histogram = [0u64; 256];
    let mut samples = 0u64;
    for y in (0..height).step_by(step_y as usize) {
        for x in (0..width).step_by(step_x as usize) {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            colors.insert([r, g, b]);
            let luma = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as usize;
            histogram[luma.min(255)] += 1;
            samples += 1;
        }
    }

    let entropy: f64 = histogram
        .iter()
        .filter(|count| **count > 0)
        .map(|count| {
            let p = *count as f64 / samples as f64;
            -p * p.log2()
        })
        .sum();
    if colors.len() > PHOTO_COLOR_COUNT || entropy > PHOTO_ENTROPY_BITS {
        ImageKind::Photographic
    } else {
        ImageKind::Diagram
    }
}

// -- Encoding helpers ---------------------------------------------------------

/// Downscale to `max_width` with Lanczos3, preserving aspect ratio.
fn fit_width(image: DynamicImage, max_width: u32) -> DynamicImage {
    if image.width() <= max_width || max_width == 0 {
        return image;
    }
    let height = ((image.height() as f32 * max_width as f32 / image.width() as f32).round() as u32).max(1);
    image.resize_exact(max_width, height, FilterType::Lanczos3)
}

fn to_jpeg_bytes(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|err| UmbruchError::Image(format!("JPEG encoding failed: {}", err)))?;
    Ok(buffer)
}

fn to_png_bytes(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|err| UmbruchError::Image(format!("PNG encoding failed: {}", err)))?;
    Ok(buffer)
}
