// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structure module: chapter boundary detection.
//
// Detection runs in two steps so the content-analysis collaborator can sit
// between them: `detect` runs the local methods and reports weak regions,
// `resolve` fuses the local candidates with any suggestions into the final
// chapter tree.

pub mod fusion;
pub mod headings;
pub mod methods;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use umbruch_core::{
    ChapterBoundary, ChapterTree, ConversionConfig, DetectionMethod, OutlineEntry,
};

pub use fusion::WeakRegion;

use crate::pdf::ExtractedPage;
use fusion::{fuse, weak_regions};
use headings::clean_title;
use methods::{locate_heading, outline_candidates, pattern_candidates, typography_candidates};

/// A boundary proposed by the content-analysis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedBoundary {
    /// Zero-based page index.
    pub page: usize,
    pub title: String,
    pub confidence: f32,
}

/// Tuning for structure detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructureSettings {
    pub fusion_window_pages: usize,
    pub region_pages: usize,
    /// Regions whose best candidate is below this are offered for content analysis.
    pub assist_threshold: f32,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            fusion_window_pages: 2,
            region_pages: 10,
            assist_threshold: 0.7,
        }
    }
}

impl From<&ConversionConfig> for StructureSettings {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            fusion_window_pages: config.fusion_window_pages,
            region_pages: config.region_pages,
            assist_threshold: config.structure_assist_threshold,
        }
    }
}

/// Pages (blocks in reading order) plus the document outline.
#[derive(Debug, Clone, Copy)]
pub struct StructureInput<'a> {
    pub pages: &'a [ExtractedPage],
    pub outline: &'a [OutlineEntry],
    /// Used to title the single chapter when nothing else is found.
    pub title: Option<&'a str>,
}

/// Local detection results awaiting fusion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureOutcome {
    pub candidates: Vec<ChapterBoundary>,
    pub weak_regions: Vec<WeakRegion>,
}

impl StructureOutcome {
    pub fn count(&self, method: DetectionMethod) -> usize {
        self.candidates.iter().filter(|c| c.method == method).count()
    }

    pub fn needs_assistance(&self) -> bool {
        !self.weak_regions.is_empty()
    }
}

/// Combines outline, typography, page-pattern, and content-analysis signals.
#[derive(Debug, Clone, Default)]
pub struct StructureDetector {
    settings: StructureSettings,
}

impl StructureDetector {
    pub fn new(settings: StructureSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StructureSettings {
        &self.settings
    }

    /// Run the local methods and find regions that need help.
    #[instrument(skip_all, fields(pages = input.pages.len(), outline = input.outline.len()))]
    pub fn detect(&self, input: &StructureInput<'_>) -> StructureOutcome {
        let mut candidates = outline_candidates(input.outline, input.pages);
        candidates.extend(typography_candidates(input.pages));
        candidates.extend(pattern_candidates(input.pages));

        let weak_regions = weak_regions(
            &candidates,
            input.pages,
            self.settings.region_pages,
            self.settings.assist_threshold,
        );
        let outcome = StructureOutcome {
            candidates,
            weak_regions,
        };
        info!(
            outline = outcome.count(DetectionMethod::Outline),
            typography = outcome.count(DetectionMethod::Typography),
            pattern = outcome.count(DetectionMethod::Pattern),
            weak_regions = outcome.weak_regions.len(),
            "Local structure detection finished"
        );
        outcome
    }

    /// Fuse local candidates with content-analysis suggestions.
    ///
    /// Suggestions are only accepted inside weak regions. Falls back to a
    /// single whole-document chapter when nothing survives.
    #[instrument(skip_all, fields(candidates = outcome.candidates.len(), suggestions = suggestions.len()))]
    pub fn resolve(
        &self,
        input: &StructureInput<'_>,
        outcome: StructureOutcome,
        suggestions: Vec<SuggestedBoundary>,
    ) -> ChapterTree {
        let StructureOutcome {
            mut candidates,
            weak_regions,
        } = outcome;

        for suggestion in suggestions {
            let Some(page) = input.pages.get(suggestion.page) else {
                debug!(page = suggestion.page, "Suggested boundary is past the last page");
                continue;
            };
            if !weak_regions.iter().any(|region| region.contains(suggestion.page)) {
                debug!(page = suggestion.page, "Suggested boundary is outside any weak region");
                continue;
            }
            let title = clean_title(&suggestion.title);
            candidates.push(ChapterBoundary {
                page: suggestion.page,
                offset: locate_heading(&page.blocks, &title, None),
                title: (!title.is_empty()).then_some(title),
                confidence: suggestion.confidence.clamp(0.0, 1.0),
                method: DetectionMethod::ContentAnalysis,
                level: 1,
            });
        }

        let fused = fuse(candidates, self.settings.fusion_window_pages);
        let tree = if fused.is_empty() {
            ChapterTree::whole_document(input.title.map(str::to_string))
        } else {
            ChapterTree::new(fused)
        };
        info!(
            chapters = tree.len(),
            confidence = tree.average_confidence(),
            "Chapter tree resolved"
        );
        tree
    }

    /// Local detection and fusion without a content-analysis collaborator.
    pub fn detect_tree(&self, input: &StructureInput<'_>) -> ChapterTree {
        let outcome = self.detect(input);
        self.resolve(input, outcome, Vec::new())
    }
}
