// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page rendering for recognition.

use image::DynamicImage;
use image::imageops::FilterType;
use tracing::{debug, instrument};
use umbruch_core::{BoundingBox, Result, UmbruchError};

use crate::pdf::ExtractedPage;

/// Rendered pages are never enlarged beyond this factor of the source raster.
const MAX_UPSCALE: f32 = 2.0;

/// A page (or the part of it that carries content) as a raster.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page: usize,
    pub image: DynamicImage,
    /// Region of the page the raster covers, in points (top-left origin).
    pub bbox: BoundingBox,
    /// Pixels per point along both axes.
    pub scale: f32,
    /// Digest of the embedded image the raster came from, if any.
    pub source_digest: Option<String>,
}

impl RenderedPage {
    /// Map a box in raster pixels back to page space.
    pub fn to_page_space(&self, pixels: &BoundingBox) -> BoundingBox {
        let scale = if self.scale > 0.0 { self.scale } else { 1.0 };
        BoundingBox::new(
            self.bbox.x0 + pixels.x0 / scale,
            self.bbox.y0 + pixels.y0 / scale,
            self.bbox.x0 + pixels.x1 / scale,
            self.bbox.y0 + pixels.y1 / scale,
        )
    }
}

/// Turns an extracted page into a raster for recognition.
pub trait PageRenderer: Send + Sync {
    /// Render `page` at roughly `dpi`. `Ok(None)` means there is nothing to render.
    fn render(&self, page: &ExtractedPage, dpi: u32) -> Result<Option<RenderedPage>>;
}

/// Uses the largest embedded raster on the page. Scanned pages are a single
/// full-page image, so this recovers the scan without a PDF rasterizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedImageRenderer;

impl PageRenderer for EmbeddedImageRenderer {
    #[instrument(skip(self, page), fields(page = page.info.index))]
    fn render(&self, page: &ExtractedPage, dpi: u32) -> Result<Option<RenderedPage>> {
        let Some(source) = page
            .images
            .iter()
            .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
        else {
            debug!(page = page.info.index, "No raster to render");
            return Ok(None);
        };

        let image = image::load_from_memory(&source.bytes).map_err(|err| {
            UmbruchError::Image(format!(
                "failed to decode page {} raster: {}",
                page.info.index, err
            ))
        })?;
        let (native_width, native_height) = (image.width().max(1), image.height().max(1));
        let region_width = source.bbox.width().max(1.0);

        let wanted = region_width * dpi as f32 / 72.0;
        let target_width = wanted.min(native_width as f32 * MAX_UPSCALE).max(1.0).round() as u32;
        let image = if target_width == native_width {
            image
        } else {
            let target_height =
                ((native_height as f32 * target_width as f32 / native_width as f32).round() as u32).max(1);
            image.resize_exact(target_width, target_height, FilterType::Lanczos3)
        };

        debug!(
            page = page.info.index,
            width = image.width(),
            height = image.height(),
            "Page rendered from embedded raster"
        );
        Ok(Some(RenderedPage {
            page: page.info.index,
            scale: image.width() as f32 / region_width,
            image,
            bbox: source.bbox,
            source_digest: Some(source.digest.clone()),
        }))
    }
}
