// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Quality report: score components, per-stage confidence, and warnings that
// accompany every successful conversion.

use serde::{Deserialize, Serialize};

use crate::error::{Result, UmbruchError};
use crate::types::Stage;

/// Category of a recorded warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    /// Recognition or structure confidence below the configured threshold.
    LowConfidence,
    /// An optional call or page exceeded its time budget and was skipped.
    StageTimeout,
    /// An optional collaborator failed; parser-derived values were kept.
    Degraded,
    /// Work was skipped because its input was unavailable.
    Skipped,
    /// The custom result was replaced by the external engine.
    Fallback,
}

/// Inclusive 0-based page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn single(page: usize) -> Self {
        Self { start: page, end: page }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityWarning {
    pub stage: Stage,
    pub kind: WarningKind,
    pub pages: Option<PageRange>,
    pub message: String,
}

impl QualityWarning {
    pub fn new(stage: Stage, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            pages: None,
            message: message.into(),
        }
    }

    pub fn on_page(mut self, page: usize) -> Self {
        self.pages = Some(PageRange::single(page));
        self
    }

    pub fn on_pages(mut self, start: usize, end: usize) -> Self {
        self.pages = Some(PageRange { start, end });
        self
    }
}

/// Recognition confidence reported for one page (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageConfidence {
    pub page: usize,
    pub confidence: f32,
}

/// Confidence aggregate of one stage (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageConfidence {
    pub stage: Stage,
    pub confidence: f32,
}

/// The four inputs of the overall score, each on a 0–100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub chapter_confidence: f32,
    pub recognition_confidence: f32,
    pub image_association: f32,
    pub completeness: f32,
}

/// Relative weights of the score components. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub chapter_confidence: f32,
    pub recognition_confidence: f32,
    pub image_association: f32,
    pub completeness: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            chapter_confidence: 0.3,
            recognition_confidence: 0.3,
            image_association: 0.2,
            completeness: 0.2,
        }
    }
}

impl QualityWeights {
    pub fn validate(&self) -> Result<()> {
        let parts = [
            self.chapter_confidence,
            self.recognition_confidence,
            self.image_association,
            self.completeness,
        ];
        if parts.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(UmbruchError::Config(format!(
                "quality weights must each lie in [0, 1], got {parts:?}"
            )));
        }
        let total: f32 = parts.iter().sum();
        if (total - 1.0).abs() > 1e-3 {
            return Err(UmbruchError::Config(format!(
                "quality weights must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }

    /// Weighted score in [0, 100].
    pub fn combine(&self, components: &ScoreComponents) -> f32 {
        let score = components.chapter_confidence.clamp(0.0, 100.0) * self.chapter_confidence
            + components.recognition_confidence.clamp(0.0, 100.0) * self.recognition_confidence
            + components.image_association.clamp(0.0, 100.0) * self.image_association
            + components.completeness.clamp(0.0, 100.0) * self.completeness;
        if score.is_finite() {
            score.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// Score, per-stage confidence, and warnings for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Overall score in [0, 100]. Only meaningful once `finalized`.
    pub score: f32,
    pub components: ScoreComponents,
    pub stage_confidence: Vec<StageConfidence>,
    pub page_confidence: Vec<PageConfidence>,
    pub warnings: Vec<QualityWarning>,
    /// Set once the score has been computed ahead of Generation. Jobs handed
    /// to the external engine before arbitration stay unscored.
    pub finalized: bool,
}

impl QualityReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_warning(&mut self, warning: QualityWarning) {
        self.warnings.push(warning);
    }

    pub fn record_stage(&mut self, stage: Stage, confidence: f32) {
        let confidence = confidence.clamp(0.0, 100.0);
        match self.stage_confidence.iter_mut().find(|c| c.stage == stage) {
            Some(existing) => existing.confidence = confidence,
            None => self.stage_confidence.push(StageConfidence { stage, confidence }),
        }
    }

    pub fn record_page(&mut self, page: usize, confidence: f32) {
        self.page_confidence.push(PageConfidence {
            page,
            confidence: confidence.clamp(0.0, 100.0),
        });
        self.page_confidence.sort_by_key(|c| c.page);
    }

    /// Store the components and the combined score.
    pub fn finalize(&mut self, components: ScoreComponents, weights: &QualityWeights) {
        self.components = components;
        self.score = weights.combine(&components);
        self.finalized = true;
    }

    /// The overall score, or `None` when it was never computed.
    pub fn final_score(&self) -> Option<f32> {
        self.finalized.then_some(self.score)
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }

    pub fn warnings_for(&self, stage: Stage) -> impl Iterator<Item = &QualityWarning> {
        self.warnings.iter().filter(move |w| w.stage == stage)
    }
}
