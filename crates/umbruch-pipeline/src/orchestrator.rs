// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline orchestrator: drives one job through Analysis, Extraction,
// Recognition, Structure, Enhancement, and Generation, and hands it to the
// external engine when the custom result cannot stand.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};
use umbruch_core::config::PresetTable;
use umbruch_core::package::PackageMetadata;
use umbruch_core::{
    BlockOrigin, ChapterTree, ConversionConfig, DocumentMetadata, ImageAsset, JobId,
    OutputPackage, ProgressEvent, QualityPreset, QualityReport, QualityWarning, RawImage, Result,
    SourceDocument, Stage, StageTiming, UmbruchError, WarningKind,
};
use umbruch_document::assemble::{PackageAssembler, primary_language, validate_package};
use umbruch_document::image::ImageSettings;
use umbruch_document::recognition::recognized_blocks;
use umbruch_document::structure::{StructureSettings, SuggestedBoundary};
use umbruch_document::{
    AssemblyInput, EmbeddedImageRenderer, ExtractedPage, ImageProcessor, ImageStats,
    LayoutAnalyzer, NoRecognizer, OutputAssembler, PageLayout, PageRenderer, PdfReader,
    RecognitionEngine, StructureDetector, StructureInput, TextRecognizer, write_epub,
};

use crate::cancel::CancellationFlag;
use crate::context::JobContext;
use crate::enhancer::{
    BoundaryAdvisor, ContentEnhancer, NoopEnhancer, OpenAiCompatibleEnhancer, merge_metadata,
};
use crate::fallback::{
    ComplexityProfile, ConversionEngine, ExternalCommandEngine, FallbackArbitrator,
    FallbackTrigger, QualityInputs,
};
use crate::pool::{ItemOutcome, WorkerPool};
use crate::recovery::{Disposition, classify_error};

/// Title used for the package when the document carries none.
const UNTITLED: &str = "Untitled";
/// Chapter titles longer than this are offered for refinement.
const TITLE_REFINE_CHARS: usize = 80;
/// Characters of document text sent for metadata inference.
const METADATA_SAMPLE_CHARS: usize = 3000;
/// Pages sampled for metadata inference.
const METADATA_SAMPLE_PAGES: usize = 3;
/// Characters of chapter text sent for title refinement.
const TITLE_EXCERPT_CHARS: usize = 1000;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// One conversion to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub preset: QualityPreset,
    /// Skip the custom pipeline and run the external engine.
    pub force_fallback: bool,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            preset: QualityPreset::default(),
            force_fallback: false,
        }
    }

    pub fn preset(mut self, preset: QualityPreset) -> Self {
        self.preset = preset;
        self
    }

    pub fn force_fallback(mut self, force: bool) -> Self {
        self.force_fallback = force;
        self
    }
}

/// Everything a successful job produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub job_id: JobId,
    /// `Completed` or `FallbackCompleted`.
    pub final_stage: Stage,
    pub preset: QualityPreset,
    pub package: OutputPackage,
    /// Scored only when the custom pass got as far as arbitration; see
    /// [`QualityReport::final_score`].
    pub report: QualityReport,
    pub timings: Vec<StageTiming>,
    pub chapters: ChapterTree,
    pub source: SourceDocument,
    pub image_stats: ImageStats,
    /// Why the external engine took over, if it did.
    pub fallback_trigger: Option<FallbackTrigger>,
}

/// A job that ended in `Failed`. The report keeps every warning recorded
/// before the failure.
#[derive(Debug, thiserror::Error)]
#[error("job {job_id} failed during {stage}: {error}")]
pub struct JobFailure {
    pub job_id: JobId,
    pub stage: Stage,
    #[source]
    pub error: UmbruchError,
    pub report: QualityReport,
    pub timings: Vec<StageTiming>,
}

/// What is installed and configured.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub recognizer: String,
    pub recognizer_available: bool,
    pub enhancer: String,
    pub enhancer_available: bool,
    pub boundary_advisor_available: bool,
    pub engine: Option<String>,
    pub engine_available: bool,
    pub workers: usize,
    pub presets: PresetTable,
}

/// State gathered so far, kept for the fallback path and the outcome.
#[derive(Debug, Default)]
struct JobState {
    source: SourceDocument,
    metadata: DocumentMetadata,
    chapters: ChapterTree,
    image_stats: ImageStats,
    /// Detected language of the text, once extraction has run.
    language: Option<String>,
}

/// Terminal result of [`Pipeline::run`].
struct Finished {
    stage: Stage,
    package: OutputPackage,
    trigger: Option<FallbackTrigger>,
}

/// Output of the Extraction and Recognition stages.
struct Extracted {
    pages: Vec<ExtractedPage>,
    layouts: Vec<PageLayout>,
    recognition_pages: usize,
    /// Page-sized scans that still need text after recognition. Rasters whose
    /// recognition found nothing are illustrations and leave this set.
    scan_pages: HashSet<usize>,
    recognition_confidences: Vec<f32>,
    /// `(page, digest)` of rasters whose text was recognized.
    recognized_rasters: HashSet<(usize, String)>,
    /// Recognized pages below the confidence threshold, with their confidence.
    low_confidence: Vec<(usize, f32)>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

enum EngineChoice {
    Configured,
    Custom(Arc<dyn ConversionEngine>),
    Disabled,
}

/// Assembles a [`Pipeline`] from its collaborators. Anything not set gets
/// the configured default.
pub struct PipelineBuilder {
    config: ConversionConfig,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    enhancer: Option<Arc<dyn ContentEnhancer>>,
    advisor: Option<Arc<dyn BoundaryAdvisor>>,
    assembler: Option<Arc<dyn PackageAssembler>>,
    engine: EngineChoice,
    pool: Option<WorkerPool>,
}

impl PipelineBuilder {
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            config,
            recognizer: None,
            renderer: None,
            enhancer: None,
            advisor: None,
            assembler: None,
            engine: EngineChoice::Configured,
            pool: None,
        }
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn enhancer(mut self, enhancer: Arc<dyn ContentEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn BoundaryAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Replace the package assembler. Its output is validated before it is written.
    pub fn assembler(mut self, assembler: Arc<dyn PackageAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ConversionEngine>) -> Self {
        self.engine = EngineChoice::Custom(engine);
        self
    }

    /// Run without an external engine; every fallback then fails the job.
    pub fn no_engine(mut self) -> Self {
        self.engine = EngineChoice::Disabled;
        self
    }

    /// Share a worker pool with other pipelines.
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let (default_enhancer, default_advisor): (Arc<dyn ContentEnhancer>, Arc<dyn BoundaryAdvisor>) =
            match OpenAiCompatibleEnhancer::from_config(&self.config.enhancer)? {
                Some(adapter) => {
                    let adapter = Arc::new(adapter);
                    (adapter.clone(), adapter)
                }
                None => (Arc::new(NoopEnhancer), Arc::new(NoopEnhancer)),
            };
        let enhancer = self.enhancer.unwrap_or(default_enhancer);
        let advisor = self.advisor.unwrap_or(default_advisor);

        let engine: Option<Arc<dyn ConversionEngine>> = match self.engine {
            EngineChoice::Configured => Some(Arc::new(ExternalCommandEngine::new(&self.config.engine))),
            EngineChoice::Custom(engine) => Some(engine),
            EngineChoice::Disabled => None,
        };

        let recognition = RecognitionEngine::new(
            self.renderer.unwrap_or_else(|| Arc::new(EmbeddedImageRenderer)),
            self.recognizer.unwrap_or_else(default_recognizer),
        );

        let pipeline = Pipeline {
            recognition,
            enhancer,
            advisor,
            assembler: self.assembler.unwrap_or_else(|| Arc::new(OutputAssembler::new())),
            arbitrator: FallbackArbitrator::new(&self.config, engine),
            pool: self.pool.unwrap_or_else(|| WorkerPool::new(self.config.workers)),
            layout: LayoutAnalyzer::new(self.config.layout),
            structure: StructureDetector::new(StructureSettings::from(&self.config)),
            config: self.config,
        };
        info!(
            recognizer = pipeline.recognition.recognizer_name(),
            enhancer = pipeline.enhancer.name(),
            workers = pipeline.pool.size(),
            "Pipeline ready"
        );
        Ok(pipeline)
    }
}

#[cfg(feature = "ocr")]
fn default_recognizer() -> Arc<dyn TextRecognizer> {
    use umbruch_document::recognition::ocr::{OcrsRecognizer, model_directory, models_available};

    if models_available() {
        match OcrsRecognizer::with_defaults() {
            Ok(recognizer) => return Arc::new(recognizer),
            Err(err) => warn!(error = %err, "OCR models present but failed to load"),
        }
    } else {
        info!(directory = %model_directory().display(), "OCR models not installed; scanned pages will be skipped");
    }
    Arc::new(NoRecognizer)
}

#[cfg(not(feature = "ocr"))]
fn default_recognizer() -> Arc<dyn TextRecognizer> {
    Arc::new(NoRecognizer)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Runs conversion jobs. Cheap to share behind an `Arc`; each job gets its
/// own context and workspace.
pub struct Pipeline {
    config: ConversionConfig,
    recognition: RecognitionEngine,
    enhancer: Arc<dyn ContentEnhancer>,
    advisor: Arc<dyn BoundaryAdvisor>,
    assembler: Arc<dyn PackageAssembler>,
    arbitrator: FallbackArbitrator,
    pool: WorkerPool,
    layout: LayoutAnalyzer,
    structure: StructureDetector,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("recognition", &self.recognition)
            .field("enhancer", &self.enhancer.name())
            .field("arbitrator", &self.arbitrator)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder(config: ConversionConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub async fn capabilities(&self) -> Capabilities {
        let (engine, engine_available) = match self.arbitrator.engine() {
            Some(engine) => (Some(engine.name().to_string()), engine.is_available().await),
            None => (None, false),
        };
        Capabilities {
            recognizer: self.recognition.recognizer_name().to_string(),
            recognizer_available: self.recognition.is_available(),
            enhancer: self.enhancer.name().to_string(),
            enhancer_available: self.enhancer.is_available(),
            boundary_advisor_available: self.advisor.is_available(),
            engine,
            engine_available,
            workers: self.pool.size(),
            presets: self.config.presets.clone(),
        }
    }

    /// Run a job without a progress consumer.
    pub async fn convert(&self, request: ConversionRequest) -> std::result::Result<ConversionOutcome, JobFailure> {
        self.convert_with(request, None, CancellationFlag::new()).await
    }

    /// Run a job, streaming progress to `progress` and honouring `cancel`.
    #[instrument(skip_all, fields(input = %request.input.display(), preset = %request.preset))]
    pub async fn convert_with(
        &self,
        request: ConversionRequest,
        progress: Option<UnboundedSender<ProgressEvent>>,
        cancel: CancellationFlag,
    ) -> std::result::Result<ConversionOutcome, JobFailure> {
        let job_id = JobId::new();
        let profile = self.config.profile(request.preset).clone();
        let mut ctx = JobContext::new(job_id, request.preset, profile, progress, cancel).map_err(|error| JobFailure {
            job_id,
            stage: Stage::Analysis,
            error,
            report: QualityReport::new(),
            timings: Vec::new(),
        })?;
        info!(job_id = %job_id, "Conversion started");

        let mut state = JobState::default();
        match self.run(&request, &mut ctx, &mut state).await {
            Ok(finished) => {
                let message = match finished.stage {
                    Stage::FallbackCompleted => "Conversion finished by the external engine",
                    _ => "Conversion finished",
                };
                let (timings, report) = ctx.finish(finished.stage, message);
                info!(
                    job_id = %job_id,
                    stage = %finished.stage,
                    score = ?report.final_score(),
                    warnings = report.warnings.len(),
                    "Conversion complete"
                );
                Ok(ConversionOutcome {
                    job_id,
                    final_stage: finished.stage,
                    preset: request.preset,
                    package: finished.package,
                    report,
                    timings,
                    chapters: state.chapters,
                    source: state.source,
                    image_stats: state.image_stats,
                    fallback_trigger: finished.trigger,
                })
            }
            Err(error) => {
                let stage = ctx.stage();
                warn!(job_id = %job_id, stage = %stage, error = %error, "Conversion failed");
                let (timings, report) = ctx.finish(Stage::Failed, format!("Conversion failed: {error}"));
                Err(JobFailure {
                    job_id,
                    stage,
                    error,
                    report,
                    timings,
                })
            }
        }
    }

    async fn run(&self, request: &ConversionRequest, ctx: &mut JobContext, state: &mut JobState) -> Result<Finished> {
        ctx.check_cancelled()?;

        // -- Analysis ---------------------------------------------------------
        let reader = match self.analyze(request, ctx, state).await {
            Ok(reader) => reader,
            Err(err) => return self.escalate(err, request, ctx, state).await,
        };
        if request.force_fallback {
            return self.fall_back(FallbackTrigger::Requested, request, ctx, state).await;
        }
        ctx.check_cancelled()?;

        // -- Extraction and Recognition ----------------------------------------
        ctx.advance(Stage::Extraction);
        let mut extracted = match self.extract(reader, ctx, state).await {
            Ok(extracted) => extracted,
            Err(err) => return self.escalate(err, request, ctx, state).await,
        };
        ctx.check_cancelled()?;

        ctx.advance(Stage::Recognition);
        self.recognize(&mut extracted, ctx).await?;
        state.language = Some(
            primary_language(
                &state.metadata,
                extracted.pages.iter().flat_map(|p| p.blocks.iter().map(|b| b.text.as_str())),
            )
            .1,
        );
        ctx.check_cancelled()?;

        // -- Structure and images ----------------------------------------------
        ctx.advance(Stage::Structure);
        let (pages, assets) = match self.detect_structure(std::mem::take(&mut extracted.pages), &extracted.recognized_rasters, ctx, state).await {
            Ok(result) => result,
            Err(err) => return self.escalate(err, request, ctx, state).await,
        };
        ctx.check_cancelled()?;

        // -- Arbitration -------------------------------------------------------
        let inputs = quality_inputs(&state.chapters, &pages, &assets, &extracted);
        let profile = complexity(
            pages.len(),
            extracted.scan_pages.len(),
            &extracted.layouts,
            assets.len(),
        );
        if let Some(trigger) = self.arbitrator.evaluate(&mut ctx.report, &inputs, &profile) {
            return self.fall_back(trigger, request, ctx, state).await;
        }

        // -- Enhancement -------------------------------------------------------
        ctx.advance(Stage::Enhancement);
        let mut pages = pages;
        self.enhance(request, &mut pages, &extracted.low_confidence, ctx, state).await?;
        ctx.check_cancelled()?;

        // -- Generation --------------------------------------------------------
        ctx.advance(Stage::Generation);
        match self.generate(request, pages, assets, ctx, state).await {
            Ok(package) => Ok(Finished {
                stage: Stage::Completed,
                package,
                trigger: None,
            }),
            Err(err) => self.escalate(err, request, ctx, state).await,
        }
    }

    /// Abort on fatal errors, otherwise hand the job to the external engine.
    async fn escalate(
        &self,
        err: UmbruchError,
        request: &ConversionRequest,
        ctx: &mut JobContext,
        state: &JobState,
    ) -> Result<Finished> {
        match classify_error(&err, ctx.stage()) {
            Disposition::Abort => Err(err),
            Disposition::Escalate | Disposition::Recoverable => {
                self.fall_back(FallbackTrigger::StageError(err.to_string()), request, ctx, state)
                    .await
            }
        }
    }

    // -- Stages -----------------------------------------------------------------

    async fn analyze(
        &self,
        request: &ConversionRequest,
        ctx: &mut JobContext,
        state: &mut JobState,
    ) -> Result<Arc<PdfReader>> {
        ctx.progress(0.0, "Opening document");
        let path = request.input.clone();
        let reader = run_blocking(Stage::Analysis, ctx.profile.budgets.analysis(), move || {
            PdfReader::open(&path)
        })
        .await?;

        let summary = reader.inspect();
        if summary.page_count > self.config.max_pages {
            return Err(UmbruchError::ResourceExhaustion(format!(
                "document has {} pages, above the limit of {}",
                summary.page_count, self.config.max_pages
            )));
        }

        state.metadata = summary.metadata.clone();
        state.source = SourceDocument {
            page_count: summary.page_count,
            metadata: summary.metadata,
            outline: reader.outline(),
            pages: Vec::new(),
        };
        ctx.progress(
            100.0,
            format!(
                "Found {} pages, {} outline entries",
                state.source.page_count,
                state.source.outline.len()
            ),
        );
        Ok(Arc::new(reader))
    }

    async fn extract(&self, reader: Arc<PdfReader>, ctx: &mut JobContext, state: &mut JobState) -> Result<Extracted> {
        let page_count = reader.page_count();
        let sizes: Vec<(f32, f32)> = (0..page_count).map(|index| reader.page_size(index)).collect();
        let budget = ctx.profile.budgets.extraction();
        let cancel = ctx.cancel_flag().clone();

        let layout = self.layout.clone();
        let density = self.config.glyph_density;
        let work = move |index: usize| -> Result<(ExtractedPage, PageLayout)> {
            let mut page = reader.extract_page(index, density)?;
            let page_layout = layout.analyze(index, &mut page.blocks);
            Ok((page, page_layout))
        };
        let run = self.pool.map((0..page_count).collect(), budget, &cancel, work, |done, total| {
            ctx.progress(done as f32 * 100.0 / total as f32, format!("Extracted page {done} of {total}"));
        });
        let outcomes = tokio::time::timeout(budget, run)
            .await
            .map_err(|_| UmbruchError::timeout(Stage::Extraction, budget))??;

        let mut pages = Vec::with_capacity(page_count);
        let mut layouts = Vec::with_capacity(page_count);
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let (width, height) = sizes[index];
            match outcome {
                ItemOutcome::Done((page, page_layout)) => {
                    pages.push(page);
                    layouts.push(page_layout);
                    continue;
                }
                ItemOutcome::Failed(err) => {
                    if classify_error(&err, Stage::Extraction) == Disposition::Abort {
                        return Err(err);
                    }
                    ctx.warn(
                        QualityWarning::new(
                            Stage::Extraction,
                            WarningKind::Skipped,
                            format!("page {} could not be read: {err}", index + 1),
                        )
                        .on_page(index),
                    );
                }
                ItemOutcome::TimedOut => ctx.warn(
                    QualityWarning::new(
                        Stage::Extraction,
                        WarningKind::StageTimeout,
                        format!("page {} exceeded its extraction budget", index + 1),
                    )
                    .on_page(index),
                ),
            }
            pages.push(ExtractedPage::empty(index, width, height));
            layouts.push(PageLayout {
                page: index,
                ..PageLayout::default()
            });
        }

        state.source.pages = pages.iter().map(|page| page.info).collect();
        Ok(Extracted {
            pages,
            layouts,
            recognition_pages: 0,
            scan_pages: HashSet::new(),
            recognition_confidences: Vec::new(),
            recognized_rasters: HashSet::new(),
            low_confidence: Vec::new(),
        })
    }

    /// Recognize scanned pages. Every failure here degrades the result
    /// instead of stopping the job.
    async fn recognize(&self, extracted: &mut Extracted, ctx: &mut JobContext) -> Result<()> {
        let candidates: Vec<usize> = extracted
            .pages
            .iter()
            .filter(|page| page.needs_recognition(self.config.scan_threshold))
            .map(|page| page.info.index)
            .collect();
        extracted.recognition_pages = candidates.len();
        extracted.scan_pages = candidates.iter().copied().collect();
        if candidates.is_empty() {
            ctx.progress(100.0, "No scanned pages");
            return Ok(());
        }
        let (first, last) = (candidates[0], candidates[candidates.len() - 1]);

        if !self.recognition.is_available() {
            ctx.warn(
                QualityWarning::new(
                    Stage::Recognition,
                    WarningKind::Skipped,
                    format!(
                        "{} scanned pages left unrecognized: no text recognizer is installed",
                        candidates.len()
                    ),
                )
                .on_pages(first, last),
            );
            ctx.progress(100.0, "Recognition skipped");
            return Ok(());
        }

        let page_budget = ctx.profile.budgets.recognition_page();
        let stage_budget = ctx.profile.budgets.recognition();
        let dpi = ctx.profile.recognition_dpi;
        let cancel = ctx.cancel_flag().clone();
        let engine = self.recognition.clone();
        let items: Vec<ExtractedPage> = candidates.iter().map(|&index| extracted.pages[index].clone()).collect();

        let run = self.pool.map(
            items,
            page_budget,
            &cancel,
            move |page: ExtractedPage| engine.recognize_page(&page, dpi),
            |done, total| {
                ctx.progress(done as f32 * 100.0 / total as f32, format!("Recognized page {done} of {total}"));
            },
        );
        let finished = tokio::time::timeout(stage_budget, run).await;
        let outcomes = match finished {
            Ok(outcomes) => outcomes?,
            Err(_) => {
                ctx.warn(
                    QualityWarning::new(
                        Stage::Recognition,
                        WarningKind::StageTimeout,
                        format!("recognition exceeded its budget of {stage_budget:?}; scanned pages left unrecognized"),
                    )
                    .on_pages(first, last),
                );
                return Ok(());
            }
        };

        for (&index, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                ItemOutcome::Done(Some(recognition)) if recognition.result.is_empty() => {
                    debug!(page = index, "No text recognized; raster kept as an illustration");
                    extracted.scan_pages.remove(&index);
                }
                ItemOutcome::Done(Some(recognition)) => {
                    let page = &mut extracted.pages[index];
                    let confidence = recognition.result.confidence;
                    let first_seq = page.blocks.iter().map(|b| b.id.seq + 1).max().unwrap_or(0);
                    page.blocks.extend(recognized_blocks(&recognition.result, &page.info, first_seq));
                    extracted.layouts[index] = self.layout.analyze(index, &mut page.blocks);

                    if let Some(digest) = recognition.source_digest {
                        extracted.recognized_rasters.insert((index, digest));
                    }
                    extracted.recognition_confidences.push(confidence);
                    ctx.report.record_page(index, confidence);
                    if confidence < self.config.recognition_threshold {
                        extracted.low_confidence.push((index, confidence));
                        ctx.warn(
                            QualityWarning::new(
                                Stage::Recognition,
                                WarningKind::LowConfidence,
                                format!("page {} recognized at {confidence:.0}% confidence", index + 1),
                            )
                            .on_page(index),
                        );
                    }
                }
                ItemOutcome::Done(None) => ctx.warn(
                    QualityWarning::new(
                        Stage::Recognition,
                        WarningKind::Skipped,
                        format!("page {} had nothing to recognize", index + 1),
                    )
                    .on_page(index),
                ),
                ItemOutcome::Failed(err) => {
                    if classify_error(&err, Stage::Recognition) == Disposition::Abort {
                        return Err(err);
                    }
                    ctx.warn(
                        QualityWarning::new(
                            Stage::Recognition,
                            WarningKind::Degraded,
                            format!("page {} could not be recognized: {err}", index + 1),
                        )
                        .on_page(index),
                    );
                }
                ItemOutcome::TimedOut => ctx.warn(
                    QualityWarning::new(
                        Stage::Recognition,
                        WarningKind::StageTimeout,
                        format!("page {} exceeded its recognition budget of {page_budget:?}", index + 1),
                    )
                    .on_page(index),
                ),
            }
        }

        extracted.recognition_pages = extracted.scan_pages.len();
        if !extracted.recognition_confidences.is_empty() {
            let average = extracted.recognition_confidences.iter().sum::<f32>()
                / extracted.recognition_confidences.len() as f32;
            ctx.report.record_stage(Stage::Recognition, average);
        }
        Ok(())
    }

    /// Detect chapters, then optimize and place images.
    async fn detect_structure(
        &self,
        mut pages: Vec<ExtractedPage>,
        recognized_rasters: &HashSet<(usize, String)>,
        ctx: &mut JobContext,
        state: &mut JobState,
    ) -> Result<(Vec<ExtractedPage>, Vec<ImageAsset>)> {
        let budget = ctx.profile.budgets.structure();

        let detector = self.structure.clone();
        let outline = state.source.outline.clone();
        let title = state.metadata.title.clone();
        let (pages_back, outcome) = run_blocking(Stage::Structure, budget, move || {
            let outcome = detector.detect(&StructureInput {
                pages: &pages,
                outline: &outline,
                title: title.as_deref(),
            });
            Ok((pages, outcome))
        })
        .await?;
        pages = pages_back;
        ctx.progress(40.0, format!("{} chapter candidates", outcome.candidates.len()));

        let suggestions = if outcome.needs_assistance() {
            self.consult_advisor(&outcome.weak_regions, ctx).await
        } else {
            Vec::new()
        };

        let input = StructureInput {
            pages: &pages,
            outline: &state.source.outline,
            title: state.metadata.title.as_deref(),
        };
        let tree = self.structure.resolve(&input, outcome, suggestions);
        let average = tree.average_confidence();
        ctx.report.record_stage(Stage::Structure, average * 100.0);
        if average < self.config.structure_assist_threshold {
            ctx.warn(QualityWarning::new(
                Stage::Structure,
                WarningKind::LowConfidence,
                format!("chapter boundaries detected with {:.0}% average confidence", average * 100.0),
            ));
        }
        ctx.progress(70.0, format!("{} chapters", tree.len()));
        state.chapters = tree;

        // Rasters that became text are not figures.
        let raw: Vec<RawImage> = pages
            .iter_mut()
            .flat_map(|page| std::mem::take(&mut page.images))
            .filter(|image| !recognized_rasters.contains(&(image.page, image.digest.clone())))
            .collect();
        let placements = raw.len();
        let processor = ImageProcessor::new(ImageSettings::from_profile(&ctx.profile, &self.config));
        let (pages, (assets, stats)) = run_blocking(Stage::Structure, budget, move || {
            let processed = processor.process_all(&raw, |index| {
                pages.get(index).map(|page| page.blocks.as_slice()).unwrap_or_default()
            })?;
            Ok((pages, processed))
        })
        .await?;

        let placed = assets.len();
        if placed < placements {
            ctx.warn(QualityWarning::new(
                Stage::Structure,
                WarningKind::Degraded,
                format!("{} images could not be decoded and were left out", placements - placed),
            ));
        }
        ctx.progress(100.0, format!("{placed} images placed"));
        state.image_stats = stats;
        Ok((pages, assets))
    }

    /// Ask the boundary advisor about weak regions, one region at a time.
    async fn consult_advisor(
        &self,
        regions: &[umbruch_document::structure::WeakRegion],
        ctx: &mut JobContext,
    ) -> Vec<SuggestedBoundary> {
        if !ctx.profile.enhancement_enabled || !self.advisor.is_available() {
            debug!(regions = regions.len(), "Weak regions left to local detection");
            return Vec::new();
        }
        let call_budget = ctx.profile.budgets.enhancement_call();
        let mut suggestions = Vec::new();
        for region in regions {
            match tokio::time::timeout(call_budget, self.advisor.suggest_boundaries(&region.excerpt)).await {
                Ok(Ok(found)) => {
                    debug!(first = region.first_page, found = found.len(), "Boundary suggestions received");
                    suggestions.extend(found);
                }
                Ok(Err(err)) => ctx.warn(
                    QualityWarning::new(
                        Stage::Structure,
                        WarningKind::Degraded,
                        format!("boundary advisor failed: {err}"),
                    )
                    .on_pages(region.first_page, region.last_page),
                ),
                Err(_) => ctx.warn(
                    QualityWarning::new(
                        Stage::Structure,
                        WarningKind::StageTimeout,
                        format!("boundary advisor did not answer within {call_budget:?}"),
                    )
                    .on_pages(region.first_page, region.last_page),
                ),
            }
        }
        suggestions
    }

    /// Optional enhancement: metadata, chapter titles, recognized text.
    async fn enhance(
        &self,
        request: &ConversionRequest,
        pages: &mut [ExtractedPage],
        low_confidence: &[(usize, f32)],
        ctx: &mut JobContext,
        state: &mut JobState,
    ) -> Result<()> {
        if !ctx.profile.enhancement_enabled {
            ctx.progress(100.0, format!("Enhancement disabled by the {} preset", ctx.preset));
            return Ok(());
        }
        if !self.enhancer.is_available() {
            ctx.progress(100.0, "No content enhancer configured");
            return Ok(());
        }

        let deadline = Instant::now() + ctx.profile.budgets.enhancement();
        let call_budget = ctx.profile.budgets.enhancement_call();
        let calls = Calls { deadline, call_budget };

        // Metadata.
        let sample = text_sample(pages.iter().take(METADATA_SAMPLE_PAGES), 0, METADATA_SAMPLE_CHARS);
        let inferred = if sample.is_empty() {
            None
        } else {
            calls
                .run(ctx, "metadata inference", self.enhancer.infer_metadata(&sample))
                .await
        };
        if let Some(Some(inferred)) = inferred {
            let stem = request.input.file_stem().and_then(|s| s.to_str());
            state.metadata = merge_metadata(&state.metadata, inferred, stem);
        }
        ctx.check_cancelled()?;
        ctx.progress(30.0, "Metadata checked");

        // Chapter titles.
        let targets: Vec<usize> = state
            .chapters
            .iter()
            .enumerate()
            .filter(|(_, b)| b.title.as_ref().is_none_or(|t| t.chars().count() > TITLE_REFINE_CHARS))
            .map(|(index, _)| index)
            .collect();
        for index in targets {
            let (page, offset) = state.chapters.boundaries()[index].position();
            let excerpt = text_sample(pages.iter().skip(page).take(2), offset, TITLE_EXCERPT_CHARS);
            if excerpt.is_empty() {
                continue;
            }
            let refined = calls
                .run(ctx, "chapter title refinement", self.enhancer.refine_chapter_title(&excerpt))
                .await;
            match refined {
                Some(Some(title)) => state.chapters.boundaries_mut()[index].title = Some(title),
                Some(None) => {}
                None if calls.expired() => break,
                None => {}
            }
            ctx.check_cancelled()?;
        }
        ctx.progress(60.0, "Chapter titles checked");

        // Recognized text on low-confidence pages.
        'pages: for &(index, confidence) in low_confidence {
            let Some(page) = pages.get_mut(index) else {
                continue;
            };
            for block in page.blocks.iter_mut().filter(|b| b.origin == BlockOrigin::Recognized) {
                let improved = calls
                    .run(ctx, "text improvement", self.enhancer.improve_text(&block.text, confidence))
                    .await;
                match improved {
                    Some(Some(text)) => block.text = text,
                    Some(None) => {}
                    None if calls.expired() => break 'pages,
                    None => {}
                }
            }
            ctx.check_cancelled()?;
        }
        ctx.progress(100.0, "Enhancement finished");
        Ok(())
    }

    async fn generate(
        &self,
        request: &ConversionRequest,
        pages: Vec<ExtractedPage>,
        assets: Vec<ImageAsset>,
        ctx: &mut JobContext,
        state: &mut JobState,
    ) -> Result<OutputPackage> {
        let artifact = ctx.workspace().join("book.epub");
        let identifier = format!("urn:uuid:{}", ctx.job_id.0);
        let tree = state.chapters.clone();
        let metadata = state.metadata.clone();
        let target = artifact.clone();
        let assembler = Arc::clone(&self.assembler);
        ctx.progress(10.0, "Assembling package");

        let mut package = run_blocking(Stage::Generation, ctx.profile.budgets.generation(), move || {
            let package = assembler.assemble(&AssemblyInput {
                tree: &tree,
                pages: &pages,
                images: &assets,
                metadata: &metadata,
                identifier: &identifier,
            })?;
            validate_package(&package)?;
            write_epub(&package, &target)?;
            Ok(package)
        })
        .await?;
        ctx.progress(80.0, format!("{} chapters written", package.chapters.len()));

        ctx.persist(&artifact, &request.output)?;
        package.artifact = Some(request.output.clone());
        Ok(package)
    }

    /// Replace the custom result with the external engine's.
    async fn fall_back(
        &self,
        trigger: FallbackTrigger,
        request: &ConversionRequest,
        ctx: &mut JobContext,
        state: &JobState,
    ) -> Result<Finished> {
        ctx.warn(QualityWarning::new(
            ctx.stage(),
            WarningKind::Fallback,
            format!("custom conversion replaced by the external engine: {trigger}"),
        ));
        if !ctx.report.finalized {
            info!(job_id = %ctx.job_id, "Custom pass ended before scoring; the report carries no score");
        }
        ctx.advance(Stage::Generation);
        ctx.check_cancelled()?;
        ctx.progress(10.0, "Running external engine");

        let language = state
            .metadata
            .language
            .clone()
            .or_else(|| state.language.clone())
            .unwrap_or_else(|| primary_language(&state.metadata, std::iter::empty::<&str>()).1);
        let artifact = ctx.workspace().join("fallback.epub");
        let run = self
            .arbitrator
            .invoke(&trigger, &request.input, &artifact, Some(&language))
            .await?;
        ctx.progress(90.0, format!("External engine wrote {} bytes", run.bytes));
        ctx.persist(&artifact, &request.output)?;

        let metadata = PackageMetadata {
            identifier: format!("urn:uuid:{}", ctx.job_id.0),
            title: state.metadata.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
            author: state.metadata.author.clone(),
            language,
            description: state.metadata.subject.clone(),
        };
        Ok(Finished {
            stage: Stage::FallbackCompleted,
            package: OutputPackage::external(metadata, request.output.clone()),
            trigger: Some(trigger),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run CPU-bound work off the async threads within `budget`.
async fn run_blocking<T, F>(stage: Stage, budget: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(budget, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(UmbruchError::Io(std::io::Error::other(format!(
            "{stage} task failed: {join_err}"
        )))),
        Err(_) => Err(UmbruchError::timeout(stage, budget)),
    }
}

/// Deadline bookkeeping for enhancer calls.
#[derive(Debug, Clone, Copy)]
struct Calls {
    deadline: Instant,
    call_budget: Duration,
}

impl Calls {
    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Await one enhancer call. `None` when it failed or ran out of time;
    /// either is recorded as a degraded result.
    async fn run<T>(&self, ctx: &mut JobContext, what: &str, call: impl Future<Output = Result<T>>) -> Option<T> {
        let budget = self.deadline.saturating_duration_since(Instant::now()).min(self.call_budget);
        if budget.is_zero() {
            debug!(call = what, "Enhancement budget spent; call skipped");
            return None;
        }
        match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                ctx.warn(QualityWarning::new(
                    Stage::Enhancement,
                    WarningKind::Degraded,
                    format!("{what} failed, keeping extracted values: {err}"),
                ));
                None
            }
            Err(_) => {
                ctx.warn(QualityWarning::new(
                    Stage::Enhancement,
                    WarningKind::Degraded,
                    format!("{what} timed out after {budget:?}, keeping extracted values"),
                ));
                None
            }
        }
    }
}

/// Leading text of `pages`, starting at block `offset` of the first page.
fn text_sample<'a>(pages: impl Iterator<Item = &'a ExtractedPage>, offset: usize, limit: usize) -> String {
    let mut sample = String::new();
    for (n, page) in pages.enumerate() {
        let skip = if n == 0 { offset } else { 0 };
        for block in page.blocks.iter().skip(skip) {
            let text = block.text.trim();
            if text.is_empty() {
                continue;
            }
            if !sample.is_empty() {
                sample.push('\n');
            }
            sample.push_str(text);
            if sample.chars().count() >= limit {
                return sample.chars().take(limit).collect();
            }
        }
    }
    sample
}

/// Score inputs. Pages expected to carry text are those with text plus the
/// scans still waiting for it; images only count toward association when
/// their page has text to attach to.
fn quality_inputs(
    chapters: &ChapterTree,
    pages: &[ExtractedPage],
    assets: &[ImageAsset],
    extracted: &Extracted,
) -> QualityInputs {
    let text_pages: HashSet<usize> = pages
        .iter()
        .filter(|p| p.blocks.iter().any(|b| b.char_count() > 0))
        .map(|p| p.info.index)
        .collect();
    let placed: Vec<&ImageAsset> = assets.iter().filter(|a| text_pages.contains(&a.page)).collect();
    QualityInputs {
        chapter_confidence: chapters.average_confidence(),
        recognition_pages: extracted.recognition_pages,
        recognition_confidences: extracted.recognition_confidences.clone(),
        images_total: placed.len(),
        images_associated: placed.iter().filter(|a| a.associated_block.is_some()).count(),
        content_pages: text_pages.union(&extracted.scan_pages).count(),
        pages_with_text: text_pages.len(),
    }
}

fn complexity(page_count: usize, scanned: usize, layouts: &[PageLayout], images: usize) -> ComplexityProfile {
    ComplexityProfile {
        scanned_fraction: if page_count == 0 {
            0.0
        } else {
            scanned as f32 / page_count as f32
        },
        multi_column_pages: layouts.iter().filter(|layout| layout.is_multi_column()).count(),
        image_count: images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use umbruch_core::{
        BlockId, BoundingBox, FontDescriptor, ImageEncoding, ImageKind, PageInfo, TextBlock,
    };

    fn page(index: usize, texts: &[&str]) -> ExtractedPage {
        let mut page = ExtractedPage::empty(index, 595.0, 842.0);
        page.blocks = texts
            .iter()
            .enumerate()
            .map(|(seq, text)| TextBlock {
                id: BlockId { page: index, seq },
                page: index,
                bbox: BoundingBox::new(72.0, 72.0 + seq as f32 * 20.0, 500.0, 88.0 + seq as f32 * 20.0),
                font: FontDescriptor::default(),
                text: text.to_string(),
                reading_order: seq,
                origin: BlockOrigin::Extracted,
                table_cell: None,
            })
            .collect();
        page.info = PageInfo {
            char_count: texts.iter().map(|t| t.len()).sum(),
            scan_probability: 0.0,
            ..page.info
        };
        page
    }

    #[test]
    fn text_sample_starts_at_offset_and_truncates() {
        let pages = vec![page(0, &["Front matter", "Chapter One", "It began"]), page(1, &["Later"])];
        assert_eq!(text_sample(pages.iter(), 1, 100), "Chapter One\nIt began\nLater");
        assert_eq!(text_sample(pages.iter(), 0, 5), "Front");
    }

    fn extracted(scan_pages: &[usize], recognition_pages: usize) -> Extracted {
        Extracted {
            pages: Vec::new(),
            layouts: Vec::new(),
            recognition_pages,
            scan_pages: scan_pages.iter().copied().collect(),
            recognition_confidences: Vec::new(),
            recognized_rasters: HashSet::new(),
            low_confidence: Vec::new(),
        }
    }

    fn asset(page: usize, associated: bool) -> ImageAsset {
        ImageAsset {
            id: format!("img-{page}"),
            page,
            bbox: BoundingBox::new(72.0, 200.0, 523.0, 538.0),
            bytes: Vec::new(),
            encoding: ImageEncoding::Jpeg,
            kind: ImageKind::Photographic,
            width: 800,
            height: 600,
            associated_block: associated.then_some(BlockId { page, seq: 0 }),
            alt_text: None,
        }
    }

    #[test]
    fn illustration_plates_do_not_lower_completeness_or_association() {
        let tree = ChapterTree::new(vec![]);
        // Prose, a text-less plate, prose.
        let pages = vec![page(0, &["Morning"]), page(1, &[]), page(2, &["Evening"])];
        let assets = vec![asset(1, false)];
        let inputs = quality_inputs(&tree, &pages, &assets, &extracted(&[], 0));
        assert_eq!(inputs.content_pages, 2);
        assert_eq!(inputs.pages_with_text, 2);
        assert_eq!(inputs.images_total, 0);
        assert_eq!(inputs.recognition_pages, 0);
        let components = inputs.components();
        assert_eq!(components.completeness, 100.0);
        assert_eq!(components.recognition_confidence, 100.0);
    }

    #[test]
    fn unrecognized_scans_count_against_completeness() {
        let tree = ChapterTree::new(vec![]);
        let pages = vec![page(0, &["Morning"]), page(1, &[])];
        let inputs = quality_inputs(&tree, &pages, &[asset(0, true)], &extracted(&[1], 1));
        assert_eq!(inputs.content_pages, 2);
        assert_eq!(inputs.pages_with_text, 1);
        assert_eq!(inputs.images_total, 1);
        assert_eq!(inputs.images_associated, 1);
        assert_eq!(inputs.components().recognition_confidence, 0.0);
    }

    #[test]
    fn complexity_counts_scanned_pages() {
        let profile = complexity(2, 1, &[], 3);
        assert_eq!(profile.scanned_fraction, 0.5);
        assert_eq!(profile.multi_column_pages, 0);
        assert_eq!(profile.image_count, 3);
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = ConversionRequest::new("in.pdf", "out.epub")
            .preset(QualityPreset::High)
            .force_fallback(true);
        assert_eq!(request.preset, QualityPreset::High);
        assert!(request.force_fallback);
        assert_eq!(request.output, Path::new("out.epub"));
    }

    #[tokio::test]
    async fn blocking_work_is_bounded_by_its_budget() {
        let result = run_blocking(Stage::Generation, Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(UmbruchError::StageTimeout { stage: Stage::Generation, .. })
        ));
    }

    #[tokio::test]
    async fn capabilities_report_defaults() {
        let pipeline = Pipeline::builder(ConversionConfig::default())
            .no_engine()
            .build()
            .expect("pipeline");
        let capabilities = pipeline.capabilities().await;
        assert!(!capabilities.enhancer_available);
        assert_eq!(capabilities.engine, None);
        assert!(!capabilities.engine_available);
        assert!(capabilities.workers >= 1);
    }
}
