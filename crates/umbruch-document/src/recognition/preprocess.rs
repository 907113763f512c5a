// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page image preprocessing ahead of recognition: deskew, denoise, contrast
// normalisation, and adaptive binarization.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use tracing::{debug, info, instrument};

/// Largest skew (degrees) searched in either direction.
const MAX_SKEW_DEGREES: f32 = 5.0;
const SKEW_STEP_DEGREES: f32 = 0.5;
/// Skew is estimated on a copy no wider than this.
const SKEW_SAMPLE_WIDTH: u32 = 600;
/// Contrast is stretched when more than this share of pixels sits in the mid-grey band.
const MID_GREY_SHARE: f32 = 0.7;
const MID_GREY_BAND: std::ops::Range<u8> = 100..155;
const CONTRAST_FACTOR: f32 = 1.5;
const BINARIZE_RADIUS: u32 = 15;
const BINARIZE_OFFSET: i32 = 10;

/// Cleans up a rendered page for recognition.
///
/// Steps consume and return `self` so they chain like the image processor.
/// [`PagePreprocessor::prepare`] runs the full sequence.
pub struct PagePreprocessor {
    image: GrayImage,
    /// Correction applied by [`PagePreprocessor::deskew`], in degrees.
    skew_correction: f32,
}

impl PagePreprocessor {
    pub fn new(image: &DynamicImage) -> Self {
        Self {
            image: image.to_luma8(),
            skew_correction: 0.0,
        }
    }

    pub fn from_gray(image: GrayImage) -> Self {
        Self {
            image,
            skew_correction: 0.0,
        }
    }

    pub fn skew_correction(&self) -> f32 {
        self.skew_correction
    }

    pub fn into_gray(self) -> GrayImage {
        self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        DynamicImage::ImageLuma8(self.image)
    }

    // -- Pipeline -------------------------------------------------------------

    /// Deskew, denoise, normalise contrast, then binarize (radius 15, offset 10).
    #[instrument(skip(self), fields(width = self.image.width(), height = self.image.height()))]
    pub fn prepare(self) -> Self {
        let prepared = self
            .deskew()
            .denoise()
            .normalize_contrast()
            .binarize(BINARIZE_RADIUS, BINARIZE_OFFSET);
        info!(skew = prepared.skew_correction, "Page preprocessed");
        prepared
    }

    /// Estimate the skew with a projection-profile search and rotate it away.
    pub fn deskew(self) -> Self {
        let correction = estimate_skew(&self.image);
        if correction == 0.0 {
            return self;
        }
        debug!(correction, "Correcting page skew");
        let rotated = rotate_about_center(
            &self.image,
            correction.to_radians(),
            Interpolation::Bilinear,
            Luma([255u8]),
        );
        Self {
            image: rotated,
            skew_correction: correction,
        }
    }

    /// 3x3 median filter.
    pub fn denoise(self) -> Self {
        Self {
            image: median_filter(&self.image, 1, 1),
            ..self
        }
    }

    /// Stretch contrast by 1.5 around mid-grey when the page is mostly mid-grey.
    pub fn normalize_contrast(self) -> Self {
        let total = self.image.width() as usize * self.image.height() as usize;
        if total == 0 {
            return self;
        }
        let mid = self
            .image
            .pixels()
            .filter(|p| MID_GREY_BAND.contains(&p.0[0]))
            .count();
        if (mid as f32 / total as f32) <= MID_GREY_SHARE {
            return self;
        }
        debug!(mid_share = mid as f32 / total as f32, "Stretching low-contrast page");
        let mut image = self.image;
        for pixel in image.pixels_mut() {
            let value = CONTRAST_FACTOR * (pixel.0[0] as f32 - 128.0) + 128.0;
            pixel.0[0] = value.clamp(0.0, 255.0) as u8;
        }
        Self { image, ..self }
    }

    /// Adaptive thresholding against the local mean within `radius`, minus `offset`.
    pub fn binarize(self, radius: u32, offset: i32) -> Self {
        let (width, height) = self.image.dimensions();
        let integral = compute_integral_image(&self.image);
        let mut output = GrayImage::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let local_mean = region_mean(&integral, width, height, x, y, radius);
                let threshold = (local_mean as i32 - offset).clamp(0, 255) as u8;
                let value = self.image.get_pixel(x, y).0[0];
                output.put_pixel(x, y, Luma([if value < threshold { 0 } else { 255 }]));
            }
        }
        Self {
            image: output,
            ..self
        }
    }
}

// -- Skew estimation ----------------------------------------------------------

/// Angle (degrees) that best straightens the text lines, searched over
/// ±5° in 0.5° steps. Zero when no angle beats the unrotated profile.
pub fn estimate_skew(image: &GrayImage) -> f32 {
    let (width, height) = image.dimensions();
    if width < 8 || height < 8 {
        return 0.0;
    }
    let sample = if width > SKEW_SAMPLE_WIDTH {
        let sample_height = (height as f32 * SKEW_SAMPLE_WIDTH as f32 / width as f32).max(1.0) as u32;
        imageops::resize(image, SKEW_SAMPLE_WIDTH, sample_height, FilterType::Triangle)
    } else {
        image.clone()
    };
    let ink_threshold = otsu_threshold(&sample);

    let steps = (MAX_SKEW_DEGREES / SKEW_STEP_DEGREES) as i32;
    let mut best_angle = 0.0;
    let mut best_score = profile_variance(&sample, ink_threshold);
    for step in -steps..=steps {
        if step == 0 {
            continue;
        }
        let angle = step as f32 * SKEW_STEP_DEGREES;
        let rotated = rotate_about_center(
            &sample,
            angle.to_radians(),
            Interpolation::Bilinear,
            Luma([255u8]),
        );
        let score = profile_variance(&rotated, ink_threshold);
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }
    best_angle
}

/// Variance of per-row ink counts. Straight text lines give sharp peaks.
fn profile_variance(image: &GrayImage, ink_threshold: u8) -> f64 {
    let rows: Vec<f64> = image
        .rows()
        .map(|row| row.filter(|p| p.0[0] <= ink_threshold).count() as f64)
        .collect();
    if rows.is_empty() {
        return 0.0;
    }
    let mean = rows.iter().sum::<f64>() / rows.len() as f64;
    rows.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rows.len() as f64
}

// -- Integral image helpers ---------------------------------------------------

/// Summed-area table of `(width+1) x (height+1)` with a zero border.
fn compute_integral_image(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum: u64 = 0;
        for x in 0..w {
            row_sum += gray.get_pixel(x, y).0[0] as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            let above = y as usize * stride + (x + 1) as usize;
            table[idx] = row_sum + table[above];
        }
    }
    table
}

/// Mean value of the square of `radius` around (cx, cy), clamped to the image.
fn region_mean(integral: &[u64], width: u32, height: u32, cx: u32, cy: u32, radius: u32) -> f64 {
    let stride = (width + 1) as usize;
    let x1 = cx.saturating_sub(radius) as usize;
    let y1 = cy.saturating_sub(radius) as usize;
    let x2 = ((cx + radius + 1) as usize).min(width as usize);
    let y2 = ((cy + radius + 1) as usize).min(height as usize);

    let area = ((x2 - x1) * (y2 - y1)) as f64;
    if area == 0.0 {
        return 128.0;
    }
    let sum = integral[y2 * stride + x2] as f64 - integral[y1 * stride + x2] as f64
        - integral[y2 * stride + x1] as f64
        + integral[y1 * stride + x1] as f64;
    sum / area
}

/// Otsu's threshold: maximises the between-class variance of the histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return 128;
    }
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, count)| value as f64 * *count as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0u64;
    let mut best_variance = 0.0;
    let mut best_threshold = 128u8;
    for (value, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }
        sum_background += value as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;
        let variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_threshold = value as u8;
        }
    }
    best_threshold
}
