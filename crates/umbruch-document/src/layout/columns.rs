// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Column band detection by projecting block x-extents onto the horizontal axis.

use serde::{Deserialize, Serialize};
use umbruch_core::BoundingBox;

/// Blocks narrower than this fraction of the text extent are used to find
/// gutters when full-width blocks hide them.
const NARROW_BLOCK_FRACTION: f32 = 0.55;

/// A vertical band of text, left edge to right edge in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnBand {
    pub x0: f32,
    pub x1: f32,
}

impl ColumnBand {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    fn distance_to(&self, x: f32) -> f32 {
        if x < self.x0 {
            self.x0 - x
        } else if x > self.x1 {
            x - self.x1
        } else {
            0.0
        }
    }
}

/// Bands plus the boxes that straddle a gutter.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ColumnSplit {
    pub bands: Vec<ColumnBand>,
    /// Indices (into the input slice) of boxes crossing a gutter.
    pub spanning: Vec<usize>,
}

impl ColumnSplit {
    /// Band whose extent contains the box centre, else the nearest band.
    pub fn band_of(&self, bbox: &BoundingBox) -> usize {
        let center = bbox.center_x();
        self.bands
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.distance_to(center).total_cmp(&b.distance_to(center)))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}

/// Merge x-intervals that are closer than `gap_min`; the result is sorted.
fn merge_intervals(mut intervals: Vec<(f32, f32)>, gap_min: f32) -> Vec<ColumnBand> {
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut bands: Vec<ColumnBand> = Vec::new();
    for (x0, x1) in intervals {
        match bands.last_mut() {
            Some(band) if x0 - band.x1 < gap_min => band.x1 = band.x1.max(x1),
            _ => bands.push(ColumnBand { x0, x1 }),
        }
    }
    bands
}

fn crosses_gutter(bbox: &BoundingBox, bands: &[ColumnBand]) -> bool {
    bands
        .windows(2)
        .any(|pair| bbox.x0 < pair[0].x1 + 1.0 && bbox.x1 > pair[1].x0 - 1.0)
}

/// Split a page's text boxes into column bands.
///
/// A gutter is a horizontal gap of at least `gap_min` that no box crosses.
/// When wide boxes such as titles cover every gap, the
/// gutters are found from the narrow boxes alone and the wide ones are
/// reported as spanning.
pub(crate) fn split_columns(boxes: &[BoundingBox], gap_min: f32) -> ColumnSplit {
    if boxes.is_empty() {
        return ColumnSplit::default();
    }

    let all = merge_intervals(boxes.iter().map(|b| (b.x0, b.x1)).collect(), gap_min);
    if all.len() > 1 {
        return ColumnSplit {
            bands: all,
            spanning: Vec::new(),
        };
    }

    let extent = all[0];
    let narrow: Vec<(f32, f32)> = boxes
        .iter()
        .filter(|b| b.width() < extent.width() * NARROW_BLOCK_FRACTION)
        .map(|b| (b.x0, b.x1))
        .collect();
    if narrow.len() >= 2 {
        let bands = merge_intervals(narrow, gap_min);
        if bands.len() > 1 {
            let spanning = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| crosses_gutter(b, &bands))
                .map(|(index, _)| index)
                .collect();
            return ColumnSplit { bands, spanning };
        }
    }

    ColumnSplit {
        bands: vec![extent],
        spanning: Vec::new(),
    }
}
