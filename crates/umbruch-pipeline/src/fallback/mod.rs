// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fallback arbitration: quality scoring, replacement triggers, and the
// external conversion engine.

pub mod calibre;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};
use umbruch_core::quality::ScoreComponents;
use umbruch_core::{ConversionConfig, QualityReport, QualityWeights, Result, UmbruchError};

pub use calibre::ExternalCommandEngine;

/// Why the custom result is being replaced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FallbackTrigger {
    /// The caller asked for the external engine.
    Requested,
    /// A required stage failed in a way the custom path cannot absorb.
    StageError(String),
    /// The quality score fell below the threshold.
    LowScore { score: f32, threshold: f32 },
    /// The document is scanned, multi-column, and image-heavy.
    Complexity,
}

impl std::fmt::Display for FallbackTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => f.write_str("external engine requested"),
            Self::StageError(detail) => write!(f, "unrecoverable stage error: {detail}"),
            Self::LowScore { score, threshold } => {
                write!(f, "quality score {score:.1} below threshold {threshold:.1}")
            }
            Self::Complexity => f.write_str("document too complex for the custom pipeline"),
        }
    }
}

/// Raw counts behind the quality score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityInputs {
    /// Average chapter boundary confidence, 0–1.
    pub chapter_confidence: f32,
    /// Scanned pages that needed recognition. Rasters where recognition found
    /// no text are illustrations and are not counted.
    pub recognition_pages: usize,
    /// Confidences (0–100) of the pages recognition produced results for.
    pub recognition_confidences: Vec<f32>,
    /// Images on pages with text, the only ones that can be associated.
    pub images_total: usize,
    pub images_associated: usize,
    /// Pages expected to carry text: pages with text plus scans.
    pub content_pages: usize,
    /// Content pages that ended up with text, directly or through recognition.
    pub pages_with_text: usize,
}

impl QualityInputs {
    /// Score components on a 0–100 scale.
    pub fn components(&self) -> ScoreComponents {
        let recognition_confidence = if self.recognition_pages == 0 {
            100.0
        } else {
            // Pages without a result count as zero.
            self.recognition_confidences.iter().fold(0.0, |sum, c| sum + c) / self.recognition_pages as f32
        };
        ScoreComponents {
            chapter_confidence: self.chapter_confidence * 100.0,
            recognition_confidence,
            image_association: ratio(self.images_associated, self.images_total),
            completeness: ratio(self.pages_with_text, self.content_pages),
        }
    }
}

/// 100 when `whole` is zero.
fn ratio(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        100.0
    } else {
        part.min(whole) as f32 * 100.0 / whole as f32
    }
}

/// Document traits judged by the complexity heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComplexityProfile {
    pub scanned_fraction: f32,
    pub multi_column_pages: usize,
    pub image_count: usize,
}

/// What the external engine produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineRun {
    pub output: PathBuf,
    pub bytes: u64,
    /// `WARNING` lines the engine printed.
    pub warnings: usize,
    pub elapsed_ms: u64,
}

/// Opaque converter used when the custom pipeline gives up.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    /// Convert `input` into a reflowable package at `output` within `timeout`.
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        language: Option<&str>,
        timeout: Duration,
    ) -> Result<EngineRun>;
}

/// Decides whether the custom result stands and runs the engine when it doesn't.
#[derive(Clone)]
pub struct FallbackArbitrator {
    threshold: f32,
    weights: QualityWeights,
    image_bound: usize,
    scanned_fraction: f32,
    timeout: Duration,
    engine: Option<Arc<dyn ConversionEngine>>,
}

impl std::fmt::Debug for FallbackArbitrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackArbitrator")
            .field("threshold", &self.threshold)
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl FallbackArbitrator {
    pub fn new(config: &ConversionConfig, engine: Option<Arc<dyn ConversionEngine>>) -> Self {
        Self {
            threshold: config.quality_threshold,
            weights: config.quality_weights,
            image_bound: config.complexity_image_bound,
            scanned_fraction: config.complexity_scanned_fraction,
            timeout: config.engine.timeout(),
            engine,
        }
    }

    pub fn engine(&self) -> Option<&Arc<dyn ConversionEngine>> {
        self.engine.as_ref()
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    /// Scanned, multi-column, and above the image bound, all at once.
    pub fn is_complex(&self, profile: &ComplexityProfile) -> bool {
        profile.scanned_fraction > self.scanned_fraction
            && profile.multi_column_pages > 0
            && profile.image_count > self.image_bound
    }

    /// Compute the score into `report` and return a trigger if the custom
    /// result should be replaced.
    pub fn evaluate(
        &self,
        report: &mut QualityReport,
        inputs: &QualityInputs,
        profile: &ComplexityProfile,
    ) -> Option<FallbackTrigger> {
        report.finalize(inputs.components(), &self.weights);
        info!(
            score = report.score,
            chapters = report.components.chapter_confidence,
            recognition = report.components.recognition_confidence,
            images = report.components.image_association,
            completeness = report.components.completeness,
            "Quality score computed"
        );
        if report.score < self.threshold {
            return Some(FallbackTrigger::LowScore {
                score: report.score,
                threshold: self.threshold,
            });
        }
        if self.is_complex(profile) {
            return Some(FallbackTrigger::Complexity);
        }
        None
    }

    /// Run the external engine. Any failure here is fatal for the job.
    #[instrument(skip(self), fields(engine = self.engine.as_ref().map(|e| e.name().to_string())))]
    pub async fn invoke(
        &self,
        trigger: &FallbackTrigger,
        input: &Path,
        output: &Path,
        language: Option<&str>,
    ) -> Result<EngineRun> {
        let Some(engine) = &self.engine else {
            return Err(UmbruchError::FallbackInvocation(format!(
                "{trigger}, but no external engine is configured"
            )));
        };
        if !engine.is_available().await {
            return Err(UmbruchError::FallbackInvocation(format!(
                "{trigger}, but {} is not installed",
                engine.name()
            )));
        }
        info!(%trigger, engine = engine.name(), "Handing the job to the external engine");
        let run = engine
            .convert(input, output, language, self.timeout)
            .await
            .map_err(|err| match err {
                UmbruchError::FallbackInvocation(_) => err,
                other => UmbruchError::FallbackInvocation(other.to_string()),
            })?;
        if run.warnings > 0 {
            warn!(warnings = run.warnings, "External engine reported warnings");
        }
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbitrator() -> FallbackArbitrator {
        FallbackArbitrator::new(&ConversionConfig::default(), None)
    }

    #[test]
    fn no_recognition_and_no_images_score_full_marks() {
        let inputs = QualityInputs {
            chapter_confidence: 1.0,
            content_pages: 10,
            pages_with_text: 10,
            ..QualityInputs::default()
        };
        let components = inputs.components();
        assert_eq!(components.recognition_confidence, 100.0);
        assert_eq!(components.image_association, 100.0);
        assert_eq!(QualityWeights::default().combine(&components), 100.0);
    }

    #[test]
    fn missing_recognition_results_count_as_zero() {
        let inputs = QualityInputs {
            recognition_pages: 4,
            recognition_confidences: vec![90.0, 90.0],
            ..QualityInputs::default()
        };
        assert_eq!(inputs.components().recognition_confidence, 45.0);
    }

    #[test]
    fn recognition_without_any_result_scores_positive_zero() {
        let inputs = QualityInputs {
            recognition_pages: 2,
            ..QualityInputs::default()
        };
        let confidence = inputs.components().recognition_confidence;
        assert_eq!(confidence, 0.0);
        assert!(confidence.is_sign_positive());
    }

    #[test]
    fn low_score_triggers_fallback() {
        let inputs = QualityInputs {
            chapter_confidence: 0.5,
            recognition_pages: 5,
            images_total: 5,
            content_pages: 5,
            ..QualityInputs::default()
        };
        let mut report = QualityReport::new();
        let trigger = arbitrator().evaluate(&mut report, &inputs, &ComplexityProfile::default());
        assert!(report.finalized);
        assert!((report.score - 15.0).abs() < 1e-3);
        assert!(matches!(trigger, Some(FallbackTrigger::LowScore { .. })));
    }

    #[test]
    fn complexity_needs_every_condition() {
        let arbitrator = arbitrator();
        let complex = ComplexityProfile {
            scanned_fraction: 0.8,
            multi_column_pages: 3,
            image_count: 51,
        };
        assert!(arbitrator.is_complex(&complex));
        assert!(!arbitrator.is_complex(&ComplexityProfile { multi_column_pages: 0, ..complex }));
        assert!(!arbitrator.is_complex(&ComplexityProfile { image_count: 50, ..complex }));
        assert!(!arbitrator.is_complex(&ComplexityProfile { scanned_fraction: 0.5, ..complex }));
    }

    #[test]
    fn good_score_keeps_custom_result() {
        let inputs = QualityInputs {
            chapter_confidence: 0.95,
            images_total: 2,
            images_associated: 2,
            content_pages: 3,
            pages_with_text: 3,
            ..QualityInputs::default()
        };
        let mut report = QualityReport::new();
        assert_eq!(arbitrator().evaluate(&mut report, &inputs, &ComplexityProfile::default()), None);
        assert!(report.score > 90.0);
    }

    #[tokio::test]
    async fn missing_engine_is_a_fatal_invocation_error() {
        let result = arbitrator()
            .invoke(&FallbackTrigger::Requested, Path::new("in.pdf"), Path::new("out.epub"), None)
            .await;
        assert!(matches!(result, Err(UmbruchError::FallbackInvocation(_))));
    }
}
