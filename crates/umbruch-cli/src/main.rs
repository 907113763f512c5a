// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Umbruch: fixed-layout PDF to reflowable EPUB.
//
// Entry point. Initialises logging, loads configuration, and runs one of the
// `convert`, `inspect`, or `capabilities` commands. Reports go to stdout as
// JSON; logs and progress go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use umbruch_core::human_errors::{Severity, humanize_error};
use umbruch_core::{
    ConversionConfig, JobId, OutlineEntry, QualityPreset, QualityReport, Stage, StageTiming,
    UmbruchError,
};
use umbruch_document::{DocumentSummary, PdfReader};
use umbruch_pipeline::{
    CancellationFlag, ConversionOutcome, ConversionRequest, FallbackTrigger, Pipeline,
};

#[derive(Debug, Parser)]
#[command(name = "umbruch", version, about = "Convert fixed-layout PDFs into reflowable EPUBs")]
struct Cli {
    /// JSON configuration file; absent fields keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a PDF into an EPUB.
    Convert {
        input: PathBuf,
        /// Output path; defaults to the input with an `.epub` extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// fast, standard, or high.
        #[arg(long, default_value = "standard")]
        preset: QualityPreset,
        /// Skip the custom pipeline and use the external engine.
        #[arg(long)]
        fallback: bool,
        /// Never call the external engine.
        #[arg(long, conflicts_with = "fallback")]
        no_engine: bool,
        /// Override the worker pool size.
        #[arg(long)]
        workers: Option<usize>,
        /// Print progress events to stderr as JSON lines.
        #[arg(long)]
        progress: bool,
        /// Also write the full job report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print what the parser sees in a PDF without converting it.
    Inspect { input: PathBuf },
    /// Print which recognizer, enhancer, and external engine are usable.
    Capabilities,
}

/// Condensed result printed after a conversion.
#[derive(Debug, Serialize)]
struct JobSummary<'a> {
    job_id: JobId,
    final_stage: Stage,
    preset: QualityPreset,
    output: Option<&'a Path>,
    /// `null` when the external engine took over before scoring.
    score: Option<f32>,
    chapters: usize,
    images: usize,
    warnings: usize,
    fallback_trigger: Option<String>,
    timings: &'a [StageTiming],
}

impl<'a> JobSummary<'a> {
    fn new(outcome: &'a ConversionOutcome) -> Self {
        Self {
            job_id: outcome.job_id,
            final_stage: outcome.final_stage,
            preset: outcome.preset,
            output: outcome.package.artifact.as_deref(),
            score: outcome.report.final_score(),
            chapters: outcome.chapters.len(),
            images: outcome.package.images.len(),
            warnings: outcome.report.warnings.len(),
            fallback_trigger: outcome.fallback_trigger.as_ref().map(FallbackTrigger::to_string),
            timings: &outcome.timings,
        }
    }
}

/// Printed when a conversion fails.
#[derive(Debug, Serialize)]
struct FailureSummary<'a> {
    job_id: JobId,
    stage: Stage,
    error: String,
    report: &'a QualityReport,
}

#[derive(Debug, Serialize)]
struct Inspection {
    #[serde(flatten)]
    summary: DocumentSummary,
    outline: Vec<OutlineEntry>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "Failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, UmbruchError> {
    let mut config = match &cli.config {
        Some(path) => ConversionConfig::load(path)?,
        None => ConversionConfig::default(),
    };

    match cli.command {
        Command::Convert {
            input,
            output,
            preset,
            fallback,
            no_engine,
            workers,
            progress,
            report,
        } => {
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let mut builder = Pipeline::builder(config);
            if no_engine {
                builder = builder.no_engine();
            }
            let pipeline = builder.build()?;

            let output = output.unwrap_or_else(|| input.with_extension("epub"));
            let request = ConversionRequest::new(input, output)
                .preset(preset)
                .force_fallback(fallback);
            convert(&pipeline, request, progress, report.as_deref()).await
        }
        Command::Inspect { input } => {
            let reader = PdfReader::open(&input)?;
            let inspection = Inspection {
                summary: reader.inspect(),
                outline: reader.outline(),
            };
            print_json(&inspection)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Capabilities => {
            let pipeline = Pipeline::builder(config).build()?;
            print_json(&pipeline.capabilities().await)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn convert(
    pipeline: &Pipeline,
    request: ConversionRequest,
    show_progress: bool,
    report_path: Option<&Path>,
) -> Result<ExitCode, UmbruchError> {
    let cancel = CancellationFlag::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling the conversion");
            interrupt.cancel();
        }
    });

    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if show_progress && let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{line}");
            }
        }
    });

    let result = pipeline.convert_with(request, Some(sender), cancel).await;
    // The sender is dropped with the job, so the printer drains and stops.
    let _ = printer.await;

    match result {
        Ok(outcome) => {
            if let Some(path) = report_path {
                std::fs::write(path, serde_json::to_vec_pretty(&outcome)?)?;
                info!(path = %path.display(), "Report written");
            }
            print_json(&JobSummary::new(&outcome))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            report_error(&failure.error);
            let summary = FailureSummary {
                job_id: failure.job_id,
                stage: failure.stage,
                error: failure.error.to_string(),
                report: &failure.report,
            };
            if let Some(path) = report_path {
                std::fs::write(path, serde_json::to_vec_pretty(&summary)?)?;
            }
            print_json(&summary)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), UmbruchError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_error(err: &UmbruchError) {
    let human = humanize_error(err);
    let label = match human.severity {
        Severity::Transient => "temporary problem",
        Severity::ActionRequired => "action needed",
        Severity::Permanent => "cannot convert",
    };
    error!(error = %err, retriable = human.retriable, "Conversion failed");
    eprintln!("umbruch: {} ({label})", human.message);
    eprintln!("  {}", human.suggestion);
}
