// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image-to-text association and placeholder alt text.

use umbruch_core::{BlockId, BoundingBox, TextBlock};

/// Alt text is cut to this many characters.
const ALT_TEXT_CHARS: usize = 100;
/// Blocks whose bottom edge overshoots the image top by this much still count as above it.
const ABOVE_TOLERANCE: f32 = 2.0;

/// The block an image belongs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub block: BlockId,
    pub alt_text: String,
}

/// Nearest preceding block by vertical distance: the lowest block whose
/// bottom edge is at or above the image top. Falls back to the nearest block
/// below the image. `None` when the page has no text.
pub fn associate(image: &BoundingBox, blocks: &[TextBlock]) -> Option<Association> {
    let above = blocks
        .iter()
        .filter(|block| block.bbox.y1 <= image.y0 + ABOVE_TOLERANCE)
        .max_by(|a, b| a.bbox.y1.total_cmp(&b.bbox.y1));
    let below = || {
        blocks
            .iter()
            .min_by(|a, b| (a.bbox.y0 - image.y1).abs().total_cmp(&(b.bbox.y0 - image.y1).abs()))
    };
    let block = above.or_else(below)?;
    Some(Association {
        block: block.id,
        alt_text: alt_text(&block.text),
    })
}

/// First 100 characters of the text, cut on a character boundary.
pub fn alt_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(ALT_TEXT_CHARS).collect()
}
