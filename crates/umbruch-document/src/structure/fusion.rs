// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Candidate fusion and weak-region detection.

use serde::{Deserialize, Serialize};
use umbruch_core::{ChapterBoundary, DetectionMethod};

use crate::pdf::ExtractedPage;

/// Leading characters of each page sent in a region excerpt.
const EXCERPT_CHARS_PER_PAGE: usize = 200;

/// Merge candidates that describe the same boundary.
///
/// Candidates are taken strongest first (confidence, then method priority).
/// Each one absorbs, for every other method, the nearest unclaimed candidate
/// within `window` pages. Candidates of the same method never absorb each
/// other. Confidences are never added.
pub fn fuse(mut candidates: Vec<ChapterBoundary>, window: usize) -> Vec<ChapterBoundary> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.method.priority().cmp(&b.method.priority()))
            .then(a.position().cmp(&b.position()))
    });

    let mut claimed = vec![false; candidates.len()];
    let mut fused = Vec::new();
    for leader in 0..candidates.len() {
        if claimed[leader] {
            continue;
        }
        claimed[leader] = true;
        let mut boundary = candidates[leader].clone();

        for method in [
            DetectionMethod::Outline,
            DetectionMethod::Typography,
            DetectionMethod::Pattern,
            DetectionMethod::ContentAnalysis,
        ] {
            if method == boundary.method {
                continue;
            }
            let nearest = (0..candidates.len())
                .filter(|i| !claimed[*i] && candidates[*i].method == method)
                .filter(|i| candidates[*i].page.abs_diff(boundary.page) <= window)
                .min_by_key(|i| {
                    (
                        candidates[*i].page.abs_diff(boundary.page),
                        candidates[*i].offset.abs_diff(boundary.offset),
                    )
                });
            if let Some(absorbed) = nearest {
                claimed[absorbed] = true;
                if boundary.title.is_none() {
                    boundary.title = candidates[absorbed].title.clone();
                }
            }
        }
        fused.push(boundary);
    }
    fused
}

/// A run of pages where local detection found nothing convincing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakRegion {
    pub first_page: usize,
    /// Inclusive.
    pub last_page: usize,
    /// Highest candidate confidence inside the region, 0 when there is none.
    pub confidence: f32,
    /// Leading text of each page, as `Page N:` sections with 1-based numbers.
    pub excerpt: String,
}

impl WeakRegion {
    pub fn contains(&self, page: usize) -> bool {
        (self.first_page..=self.last_page).contains(&page)
    }
}

/// Split the document into regions of `region_pages` pages and return those
/// whose best candidate falls below `threshold`. Regions without any text
/// are left out since there is nothing to ask about.
pub fn weak_regions(
    candidates: &[ChapterBoundary],
    pages: &[ExtractedPage],
    region_pages: usize,
    threshold: f32,
) -> Vec<WeakRegion> {
    let region_pages = region_pages.max(1);
    let mut regions = Vec::new();
    for first_page in (0..pages.len()).step_by(region_pages) {
        let last_page = (first_page + region_pages).min(pages.len()) - 1;
        let confidence = candidates
            .iter()
            .filter(|c| (first_page..=last_page).contains(&c.page))
            .map(|c| c.confidence)
            .fold(0.0f32, f32::max);
        if confidence >= threshold {
            continue;
        }
        let excerpt = region_excerpt(&pages[first_page..=last_page]);
        if excerpt.is_empty() {
            continue;
        }
        regions.push(WeakRegion {
            first_page,
            last_page,
            confidence,
            excerpt,
        });
    }
    regions
}

fn region_excerpt(pages: &[ExtractedPage]) -> String {
    let mut excerpt = String::new();
    for page in pages {
        let text: String = page
            .blocks
            .iter()
            .map(|block| block.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(EXCERPT_CHARS_PER_PAGE)
            .collect();
        if text.is_empty() {
            continue;
        }
        excerpt.push_str(&format!("Page {}:\n{}\n\n", page.info.index + 1, text));
    }
    excerpt.trim_end().to_string()
}
