// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end conversions over in-memory fixture documents, with stub
// recognizers, enhancers, and external engines.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::DynamicImage;
use tempfile::TempDir;
use umbruch_core::{
    BoundingBox, ConversionConfig, DetectionMethod, OutputPackage, QualityPreset, RecognizedLine,
    Result, Script, SourceOfTruth, Stage, UmbruchError, WarningKind,
};
use umbruch_document::fixtures::{FixtureDocument, FixtureImage, FixturePage};
use umbruch_document::structure::SuggestedBoundary;
use umbruch_document::{
    AssemblyInput, NoRecognizer, OutputAssembler, PackageAssembler, TextRecognizer,
};
use umbruch_pipeline::enhancer::InferredMetadata;
use umbruch_pipeline::fallback::EngineRun;
use umbruch_pipeline::{
    BoundaryAdvisor, CancellationFlag, ContentEnhancer, ConversionEngine, ConversionRequest,
    FallbackTrigger, Pipeline,
};

// -- Stubs --------------------------------------------------------------------

/// Returns fixed CJK lines and counts its calls.
#[derive(Default)]
struct CountingRecognizer {
    calls: AtomicUsize,
}

impl TextRecognizer for CountingRecognizer {
    fn name(&self) -> &str {
        "counting"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognizedLine>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let line_height = image.height() as f32 / 40.0;
        let lines = ["第一章 河の流れ", "夕暮れの光が静かな野原に落ちた。", "遠くの鐘が風に答えた。"];
        Ok(lines
            .iter()
            .enumerate()
            .map(|(row, text)| {
                let top = line_height * (4.0 + row as f32 * 1.5);
                RecognizedLine {
                    text: text.to_string(),
                    confidence: 92.0,
                    bbox: Some(BoundingBox::new(
                        image.width() as f32 * 0.1,
                        top,
                        image.width() as f32 * 0.9,
                        top + line_height,
                    )),
                }
            })
            .collect())
    }
}

/// Finds no text anywhere and counts its calls.
#[derive(Default)]
struct SilentRecognizer {
    calls: AtomicUsize,
}

impl TextRecognizer for SilentRecognizer {
    fn name(&self) -> &str {
        "silent"
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<Vec<RecognizedLine>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// Never answers.
struct HangingEnhancer;

#[async_trait]
impl ContentEnhancer for HangingEnhancer {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn infer_metadata(&self, _text: &str) -> Result<Option<InferredMetadata>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Some(InferredMetadata {
            title: Some("A Title Nobody Asked For".into()),
            ..InferredMetadata::default()
        }))
    }

    async fn refine_chapter_title(&self, _excerpt: &str) -> Result<Option<String>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(None)
    }

    async fn improve_text(&self, _text: &str, _confidence: f32) -> Result<Option<String>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(None)
    }
}

/// Suggests one fixed boundary for every region it is shown.
struct FixedAdvisor {
    page: usize,
}

#[async_trait]
impl BoundaryAdvisor for FixedAdvisor {
    fn is_available(&self) -> bool {
        true
    }

    async fn suggest_boundaries(&self, _excerpt: &str) -> Result<Vec<SuggestedBoundary>> {
        Ok(vec![SuggestedBoundary {
            page: self.page,
            title: "The Second Journey".into(),
            confidence: 0.7,
        }])
    }
}

/// Writes a small file to the output path and counts its calls.
#[derive(Default)]
struct CountingEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl ConversionEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting-engine"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        _input: &Path,
        output: &Path,
        _language: Option<&str>,
        _timeout: Duration,
    ) -> Result<EngineRun> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"PK external epub").await?;
        Ok(EngineRun {
            output: output.to_path_buf(),
            bytes: 16,
            warnings: 0,
            elapsed_ms: 1,
        })
    }
}

/// Fails every conversion.
struct BrokenEngine;

#[async_trait]
impl ConversionEngine for BrokenEngine {
    fn name(&self) -> &str {
        "broken-engine"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        _input: &Path,
        _output: &Path,
        _language: Option<&str>,
        _timeout: Duration,
    ) -> Result<EngineRun> {
        Err(UmbruchError::Io(std::io::Error::other("converter crashed")))
    }
}

/// Assembles normally, then points the first chapter at an image that was
/// never embedded.
struct DanglingImageAssembler;

impl PackageAssembler for DanglingImageAssembler {
    fn assemble(&self, input: &AssemblyInput<'_>) -> Result<OutputPackage> {
        let mut package = OutputAssembler::new().assemble(input)?;
        if let Some(chapter) = package.chapters.first_mut() {
            chapter.image_refs.push("img-missing".into());
        }
        Ok(package)
    }
}

// -- Helpers ------------------------------------------------------------------

fn write_fixture(dir: &TempDir, name: &str, document: FixtureDocument) -> PathBuf {
    let path = dir.path().join(name);
    document.write_to(&path).expect("write fixture");
    path
}

fn three_chapter_novel() -> FixtureDocument {
    let titles = [(0, "The Quiet River"), (4, "Orchards in Spring"), (7, "Letters on the Table")];
    let mut document = FixtureDocument::new().title("The Parser Title").author("A. Writer");
    for page in 0..10 {
        let heading = titles.iter().find(|(at, _)| *at == page).map(|(_, title)| *title);
        document = document.page(FixturePage::prose(heading, 3));
    }
    for (page, title) in titles {
        document = document.outline_entry(title, page);
    }
    document
}

/// Prose, a page holding only a photograph, prose.
fn illustrated_story() -> FixtureDocument {
    FixtureDocument::new()
        .title("The Lighthouse Keeper")
        .page(FixturePage::prose(Some("The Lamp Room"), 3))
        .page(FixturePage::blank().with_figure(FixtureImage::Photo {
            width: 800,
            height: 600,
        }))
        .page(FixturePage::prose(None, 3))
        .outline_entry("The Lamp Room", 0)
}

fn scanned_book(pages: u8) -> FixtureDocument {
    FixtureDocument::new()
        .title("Scanned Notes")
        .pages((0..pages).map(FixturePage::scanned))
}

// -- Scenarios ----------------------------------------------------------------

#[tokio::test]
async fn outlined_text_document_converts_without_recognition() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("out").join("novel.epub");

    let recognizer = Arc::new(CountingRecognizer::default());
    let engine = Arc::new(CountingEngine::default());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .recognizer(recognizer.clone())
        .engine(engine.clone())
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output))
        .await
        .expect("conversion succeeds");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert_eq!(outcome.chapters.len(), 3);
    assert!(outcome.chapters.iter().all(|c| c.confidence >= 0.9));
    assert!(outcome.chapters.iter().all(|c| c.method == DetectionMethod::Outline));
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.package.metadata.title, "The Parser Title");
    assert_eq!(outcome.package.artifact.as_deref(), Some(output.as_path()));
    assert!(output.is_file());
    assert!(outcome.report.score >= 60.0);
    assert!(outcome.fallback_trigger.is_none());
}

#[tokio::test]
async fn scanned_pages_are_recognized_once_each() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "scans.pdf", scanned_book(5));
    let output = dir.path().join("scans.epub");

    let recognizer = Arc::new(CountingRecognizer::default());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .recognizer(recognizer.clone())
        .engine(Arc::new(CountingEngine::default()))
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output))
        .await
        .expect("conversion succeeds");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert!(outcome.source.pages.iter().all(|p| p.scan_probability > 0.9));
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 5);
    assert_eq!(outcome.report.page_confidence.len(), 5);
    assert!(outcome.report.page_confidence.iter().all(|p| p.confidence >= 85.0));
    // The scans became text, so none of them is packaged as a figure.
    assert!(outcome.package.images.is_empty());
    assert_eq!(outcome.package.metadata.language, "zh");
    assert_eq!(
        outcome.package.stylesheet.as_ref().map(|s| s.script),
        Some(Script::Cjk)
    );
}

#[tokio::test]
async fn unrecognizable_scans_fall_back_to_the_external_engine() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "scans.pdf", scanned_book(5));
    let output = dir.path().join("scans.epub");

    let engine = Arc::new(CountingEngine::default());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .recognizer(Arc::new(NoRecognizer))
        .engine(engine.clone())
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output))
        .await
        .expect("fallback succeeds");

    assert_eq!(outcome.final_stage, Stage::FallbackCompleted);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(outcome.fallback_trigger, Some(FallbackTrigger::LowScore { .. })));
    assert!(outcome.report.has_warning(WarningKind::Skipped));
    assert!(outcome.report.has_warning(WarningKind::Fallback));
    assert_eq!(std::fs::read(&output).expect("output written"), b"PK external epub");
}

#[tokio::test]
async fn hanging_enhancer_keeps_parser_metadata() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("novel.epub");

    let mut config = ConversionConfig::default();
    config.presets.standard.enhancement_enabled = true;
    config.presets.standard.budgets.enhancement_call_secs = 1;
    config.presets.standard.budgets.enhancement_secs = 5;
    let pipeline = Pipeline::builder(config)
        .enhancer(Arc::new(HangingEnhancer))
        .no_engine()
        .build()
        .expect("pipeline");

    let started = Instant::now();
    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output).preset(QualityPreset::Standard))
        .await
        .expect("conversion succeeds");

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(outcome.final_stage, Stage::Completed);
    assert_eq!(outcome.package.metadata.title, "The Parser Title");
    assert!(
        outcome
            .report
            .warnings_for(Stage::Enhancement)
            .any(|w| w.kind == WarningKind::Degraded)
    );
}

#[tokio::test]
async fn advisor_suggestions_fill_weak_regions() {
    let dir = tempfile::tempdir().expect("temp dir");
    let document = FixtureDocument::new()
        .title("Unmarked")
        .pages((0..6).map(|_| FixturePage::prose(None, 3)));
    let input = write_fixture(&dir, "unmarked.pdf", document);
    let output = dir.path().join("unmarked.epub");

    let pipeline = Pipeline::builder(ConversionConfig::default())
        .advisor(Arc::new(FixedAdvisor { page: 3 }))
        .no_engine()
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output))
        .await
        .expect("conversion succeeds");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert!(outcome.chapters.iter().any(|c| {
        c.page == 3
            && c.method == DetectionMethod::ContentAnalysis
            && c.title.as_deref() == Some("The Second Journey")
    }));
}

#[tokio::test]
async fn failing_engine_fails_a_forced_fallback() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("novel.epub");

    let pipeline = Pipeline::builder(ConversionConfig::default())
        .engine(Arc::new(BrokenEngine))
        .build()
        .expect("pipeline");

    let failure = pipeline
        .convert(ConversionRequest::new(&input, &output).force_fallback(true))
        .await
        .expect_err("conversion fails");

    assert!(matches!(failure.error, UmbruchError::FallbackInvocation(_)));
    assert!(failure.report.has_warning(WarningKind::Fallback));
    assert!(!output.exists());
}

#[tokio::test]
async fn cancelled_job_stops_before_work() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("novel.epub");

    let pipeline = Pipeline::builder(ConversionConfig::default())
        .no_engine()
        .build()
        .expect("pipeline");
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let failure = pipeline
        .convert_with(ConversionRequest::new(&input, &output), None, cancel)
        .await
        .expect_err("job is cancelled");

    assert!(matches!(failure.error, UmbruchError::Cancelled));
    assert_eq!(failure.stage, Stage::Analysis);
    assert!(!output.exists());
}

#[tokio::test]
async fn unreadable_input_fails_during_analysis() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("broken.pdf");
    std::fs::write(&input, b"this is not a pdf").expect("write input");

    let engine = Arc::new(CountingEngine::default());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .engine(engine.clone())
        .build()
        .expect("pipeline");

    let failure = pipeline
        .convert(ConversionRequest::new(&input, dir.path().join("out.epub")))
        .await
        .expect_err("conversion fails");

    assert!(matches!(failure.error, UmbruchError::Parse(_)));
    assert_eq!(failure.stage, Stage::Analysis);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oversized_documents_are_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());

    let config = ConversionConfig {
        max_pages: 5,
        ..ConversionConfig::default()
    };
    let pipeline = Pipeline::builder(config).no_engine().build().expect("pipeline");

    let failure = pipeline
        .convert(ConversionRequest::new(&input, dir.path().join("out.epub")))
        .await
        .expect_err("conversion fails");

    assert!(matches!(failure.error, UmbruchError::ResourceExhaustion(_)));
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_completion() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("novel.epub");

    let pipeline = Pipeline::builder(ConversionConfig::default())
        .no_engine()
        .build()
        .expect("pipeline");
    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();

    let outcome = pipeline
        .convert_with(ConversionRequest::new(&input, &output), Some(sender), CancellationFlag::new())
        .await
        .expect("conversion succeeds");

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    assert!(events.len() > 6);
    assert!(events.iter().all(|e| e.job_id == outcome.job_id));
    assert!(
        events
            .windows(2)
            .all(|pair| pair[1].overall_percent >= pair[0].overall_percent)
    );
    let last = events.last().expect("at least one event");
    assert_eq!(last.stage, Stage::Completed);
    assert_eq!(last.overall_percent, 100.0);

    let stages: Vec<Stage> = outcome.timings.iter().map(|t| t.stage).collect();
    assert_eq!(stages.first(), Some(&Stage::Analysis));
    assert_eq!(stages.last(), Some(&Stage::Generation));
}

#[tokio::test]
async fn repeated_runs_agree() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .no_engine()
        .build()
        .expect("pipeline");

    let first = pipeline
        .convert(ConversionRequest::new(&input, dir.path().join("first.epub")))
        .await
        .expect("first run");
    let second = pipeline
        .convert(ConversionRequest::new(&input, dir.path().join("second.epub")))
        .await
        .expect("second run");

    assert_ne!(first.job_id, second.job_id);
    assert_eq!(first.chapters, second.chapters);
    assert_eq!(first.report.score, second.report.score);
    assert_eq!(first.report.warnings, second.report.warnings);
    assert!(first.chapters.is_monotonic());
}

#[tokio::test]
async fn figures_respect_the_preset_width() {
    let dir = tempfile::tempdir().expect("temp dir");
    let document = FixtureDocument::new()
        .title("Field Guide")
        .page(FixturePage::prose(Some("Birds of the Marsh"), 2).with_figure(FixtureImage::Photo {
            width: 1600,
            height: 900,
        }))
        .page(FixturePage::prose(None, 3).with_figure(FixtureImage::Diagram {
            width: 1200,
            height: 600,
        }))
        .outline_entry("Birds of the Marsh", 0);
    let input = write_fixture(&dir, "guide.pdf", document);

    let config = ConversionConfig::default();
    let max_width = config.presets.fast.image_max_width;
    let pipeline = Pipeline::builder(config).no_engine().build().expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, dir.path().join("guide.epub")).preset(QualityPreset::Fast))
        .await
        .expect("conversion succeeds");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert_eq!(outcome.package.images.len(), 2);
    assert!(outcome.package.images.iter().all(|image| image.width <= max_width));
}

#[tokio::test]
async fn illustration_plate_survives_a_recognizer_that_finds_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "story.pdf", illustrated_story());
    let output = dir.path().join("story.epub");

    let recognizer = Arc::new(SilentRecognizer::default());
    let config = ConversionConfig {
        quality_threshold: 0.0,
        ..ConversionConfig::default()
    };
    let pipeline = Pipeline::builder(config)
        .recognizer(recognizer.clone())
        .no_engine()
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output))
        .await
        .expect("conversion succeeds");

    assert_eq!(outcome.final_stage, Stage::Completed);
    // The photograph covers a third of its page, so it is not a scan.
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.package.images.len(), 1);
    assert!(outcome.package.chapters.iter().any(|c| c.image_refs.len() == 1));
}

#[tokio::test]
async fn full_page_raster_without_text_stays_a_figure() {
    let dir = tempfile::tempdir().expect("temp dir");
    let document = FixtureDocument::new()
        .title("Atlas")
        .page(FixturePage::prose(Some("Coastlines"), 3))
        .page(FixturePage::scanned(4))
        .page(FixturePage::prose(None, 3))
        .outline_entry("Coastlines", 0);
    let input = write_fixture(&dir, "atlas.pdf", document);

    let recognizer = Arc::new(SilentRecognizer::default());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .recognizer(recognizer.clone())
        .no_engine()
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, dir.path().join("atlas.epub")))
        .await
        .expect("conversion succeeds");

    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.final_stage, Stage::Completed);
    assert_eq!(outcome.package.images.len(), 1);
    assert!(outcome.report.page_confidence.is_empty());
    assert!(outcome.report.components.completeness >= 99.9);
}

#[tokio::test]
async fn illustrated_story_stays_on_the_custom_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "story.pdf", illustrated_story());

    let pipeline = Pipeline::builder(ConversionConfig::default())
        .recognizer(Arc::new(NoRecognizer))
        .no_engine()
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, dir.path().join("story.epub")))
        .await
        .expect("conversion succeeds");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert!(outcome.fallback_trigger.is_none());
    assert!(!outcome.report.has_warning(WarningKind::Skipped));
    assert_eq!(outcome.report.components.completeness, 100.0);
    assert_eq!(outcome.report.components.recognition_confidence, 100.0);
    assert!(outcome.report.final_score().is_some_and(|score| score >= 60.0));
    assert_eq!(outcome.package.images.len(), 1);
}

#[tokio::test]
async fn invalid_package_is_replaced_by_the_external_engine() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("novel.epub");

    let engine = Arc::new(CountingEngine::default());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .assembler(Arc::new(DanglingImageAssembler))
        .engine(engine.clone())
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output))
        .await
        .expect("fallback succeeds");

    assert_eq!(outcome.final_stage, Stage::FallbackCompleted);
    assert_eq!(outcome.package.source_of_truth, SourceOfTruth::Fallback);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        &outcome.fallback_trigger,
        Some(FallbackTrigger::StageError(message)) if message.contains("img-missing")
    ));
    assert!(outcome.report.has_warning(WarningKind::Fallback));
    assert_eq!(std::fs::read(&output).expect("output written"), b"PK external epub");
}

#[tokio::test]
async fn invalid_package_with_a_failing_engine_fails_the_job() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("novel.epub");

    let pipeline = Pipeline::builder(ConversionConfig::default())
        .assembler(Arc::new(DanglingImageAssembler))
        .engine(Arc::new(BrokenEngine))
        .build()
        .expect("pipeline");

    let failure = pipeline
        .convert(ConversionRequest::new(&input, &output))
        .await
        .expect_err("conversion fails");

    assert!(matches!(failure.error, UmbruchError::FallbackInvocation(_)));
    assert_eq!(failure.stage, Stage::Generation);
    assert!(!output.exists());
}

#[tokio::test]
async fn forced_fallback_reports_no_score() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = write_fixture(&dir, "novel.pdf", three_chapter_novel());
    let output = dir.path().join("novel.epub");

    let engine = Arc::new(CountingEngine::default());
    let pipeline = Pipeline::builder(ConversionConfig::default())
        .engine(engine.clone())
        .build()
        .expect("pipeline");

    let outcome = pipeline
        .convert(ConversionRequest::new(&input, &output).force_fallback(true))
        .await
        .expect("fallback succeeds");

    assert_eq!(outcome.final_stage, Stage::FallbackCompleted);
    assert!(matches!(outcome.fallback_trigger, Some(FallbackTrigger::Requested)));
    assert!(!outcome.report.finalized);
    assert_eq!(outcome.report.final_score(), None);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}
