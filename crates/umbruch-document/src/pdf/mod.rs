// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module: document inspection, content-stream interpretation, outline
// walking, and embedded image extraction.

pub mod content;
pub(crate) mod objects;
pub mod outline;
pub mod reader;
pub mod xobject;

use serde::Serialize;
use umbruch_core::{DocumentMetadata, PageInfo, RawImage, TextBlock};

pub use reader::PdfReader;

/// Share of the page one raster must cover before the page counts as a scan.
/// Smaller rasters on a text-less page are illustrations.
pub const SCAN_RASTER_COVERAGE: f32 = 0.6;

/// Everything extracted from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub info: PageInfo,
    /// Text blocks in content-stream order; layout analysis assigns reading order.
    pub blocks: Vec<TextBlock>,
    pub images: Vec<RawImage>,
}

impl ExtractedPage {
    /// Page with no content at all, used when a page's content stream is unreadable.
    pub fn empty(index: usize, width: f32, height: f32) -> Self {
        Self {
            info: PageInfo {
                index,
                width,
                height,
                char_count: 0,
                image_count: 0,
                scan_probability: 1.0,
            },
            blocks: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Largest fraction of the page area covered by a single raster.
    pub fn raster_coverage(&self) -> f32 {
        let page_area = self.info.width * self.info.height;
        if page_area <= 0.0 {
            return 0.0;
        }
        self.images
            .iter()
            .map(|image| (image.bbox.area() / page_area).clamp(0.0, 1.0))
            .fold(0.0, f32::max)
    }

    /// A page with too little text whose content is a page-sized raster.
    pub fn needs_recognition(&self, scan_threshold: f32) -> bool {
        self.info.scan_probability > scan_threshold && self.raster_coverage() >= SCAN_RASTER_COVERAGE
    }
}

/// Result of a quick structural inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub page_count: usize,
    pub encrypted: bool,
    pub has_outline: bool,
    /// Whether any page shows text through its content stream.
    pub has_text: bool,
    pub metadata: DocumentMetadata,
}

/// Fraction of a page that could not be read as text.
///
/// `1 - chars / (area * glyph_density)`, clamped to [0, 1].
pub fn scan_probability(char_count: usize, width: f32, height: f32, glyph_density: f32) -> f32 {
    let expected = width * height * glyph_density;
    if expected <= 0.0 || !expected.is_finite() {
        return 1.0;
    }
    (1.0 - char_count as f32 / expected).clamp(0.0, 1.0)
}
