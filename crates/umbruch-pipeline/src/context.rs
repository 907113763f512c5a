// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-job state: stage machine, timings, quality report, progress, and the
// temporary workspace.

use std::path::Path;
use std::time::Instant;

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use umbruch_core::{
    JobId, PresetProfile, ProgressEvent, QualityPreset, QualityReport, QualityWarning, Result,
    Stage, StageTiming,
};

use crate::cancel::CancellationFlag;
use crate::progress::ProgressReporter;

/// Mutable state of one running job.
///
/// The workspace directory lives as long as the context, so every exit path
/// (success, failure, cancellation) removes it.
#[derive(Debug)]
pub struct JobContext {
    pub job_id: JobId,
    pub preset: QualityPreset,
    /// Fixed when the job starts.
    pub profile: PresetProfile,
    pub report: QualityReport,
    workspace: TempDir,
    stage: Stage,
    stage_started: Instant,
    timings: Vec<StageTiming>,
    progress: ProgressReporter,
    cancel: CancellationFlag,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        preset: QualityPreset,
        profile: PresetProfile,
        progress: Option<UnboundedSender<ProgressEvent>>,
        cancel: CancellationFlag,
    ) -> Result<Self> {
        let workspace = tempfile::Builder::new().prefix("umbruch-").tempdir()?;
        debug!(job_id = %job_id, workspace = %workspace.path().display(), "Job workspace created");
        let mut ctx = Self {
            job_id,
            preset,
            profile,
            report: QualityReport::new(),
            workspace,
            stage: Stage::Analysis,
            stage_started: Instant::now(),
            timings: Vec::new(),
            progress: ProgressReporter::new(job_id, progress),
            cancel,
        };
        ctx.progress(0.0, format!("Starting conversion ({preset} preset)"));
        Ok(ctx)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    pub fn cancel_flag(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    /// Move to a later working stage. Backward moves are ignored.
    pub fn advance(&mut self, next: Stage) {
        if next <= self.stage || next.is_terminal() {
            debug!(from = %self.stage, to = %next, "Ignoring non-forward stage transition");
            return;
        }
        self.close_stage();
        self.stage = next;
        self.stage_started = Instant::now();
        self.progress(0.0, format!("Starting {next}"));
    }

    /// Report progress within the current stage.
    pub fn progress(&mut self, stage_percent: f32, message: impl Into<String>) {
        self.progress.report(self.stage, stage_percent, message);
    }

    /// Record a warning on the report and in the log.
    pub fn warn(&mut self, warning: QualityWarning) {
        warn!(
            job_id = %self.job_id,
            stage = %warning.stage,
            kind = ?warning.kind,
            "{}",
            warning.message
        );
        self.report.push_warning(warning);
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    /// Copy a finished artifact out of the workspace to `destination`.
    pub fn persist(&self, artifact: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = std::fs::copy(artifact, destination)?;
        info!(job_id = %self.job_id, bytes, destination = %destination.display(), "Output written");
        Ok(())
    }

    /// Close the job in `terminal`, returning its timings and report. The
    /// workspace is removed here.
    pub fn finish(mut self, terminal: Stage, message: impl Into<String>) -> (Vec<StageTiming>, QualityReport) {
        self.close_stage();
        self.progress.report(terminal, 100.0, message);
        self.stage = terminal;
        (self.timings, self.report)
    }

    fn close_stage(&mut self) {
        if self.stage.is_terminal() {
            return;
        }
        let elapsed_ms = self.stage_started.elapsed().as_millis() as u64;
        self.timings.push(StageTiming {
            stage: self.stage,
            elapsed_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbruch_core::WarningKind;

    fn context() -> JobContext {
        JobContext::new(
            JobId::new(),
            QualityPreset::Fast,
            PresetProfile::fast(),
            None,
            CancellationFlag::new(),
        )
        .expect("context")
    }

    #[test]
    fn stages_only_move_forward() {
        let mut ctx = context();
        ctx.advance(Stage::Extraction);
        ctx.advance(Stage::Analysis);
        assert_eq!(ctx.stage(), Stage::Extraction);
        ctx.advance(Stage::Generation);
        assert_eq!(ctx.stage(), Stage::Generation);
        let stages: Vec<Stage> = ctx.timings().iter().map(|t| t.stage).collect();
        assert_eq!(stages, vec![Stage::Analysis, Stage::Extraction]);
    }

    #[test]
    fn workspace_is_removed_on_finish() {
        let mut ctx = context();
        let workspace = ctx.workspace().to_path_buf();
        assert!(workspace.is_dir());
        ctx.warn(QualityWarning::new(Stage::Analysis, WarningKind::Skipped, "nothing to do"));
        let (timings, report) = ctx.finish(Stage::Completed, "done");
        assert!(!workspace.exists());
        assert_eq!(timings.len(), 1);
        assert!(report.has_warning(WarningKind::Skipped));
    }

    #[test]
    fn persist_copies_into_new_directories() {
        let ctx = context();
        let artifact = ctx.workspace().join("book.epub");
        std::fs::write(&artifact, b"epub").expect("write artifact");
        let out = tempfile::tempdir().expect("out dir");
        let destination = out.path().join("nested").join("book.epub");
        ctx.persist(&artifact, &destination).expect("persist");
        assert_eq!(std::fs::read(&destination).expect("read back"), b"epub");
    }
}
