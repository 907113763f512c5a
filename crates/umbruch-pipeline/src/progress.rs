// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ordered progress events for a single consumer.

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use umbruch_core::{JobId, ProgressEvent, Stage};

/// Emits progress for one job.
///
/// Overall percentages never decrease. A dropped receiver is ignored.
#[derive(Debug)]
pub struct ProgressReporter {
    job_id: JobId,
    sender: Option<UnboundedSender<ProgressEvent>>,
    overall: f32,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, sender: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            job_id,
            sender,
            overall: 0.0,
        }
    }

    /// Highest overall percentage reported so far.
    pub fn overall(&self) -> f32 {
        self.overall
    }

    /// Report `stage_percent` (0–100) of `stage`.
    pub fn report(&mut self, stage: Stage, stage_percent: f32, message: impl Into<String>) -> ProgressEvent {
        let stage_percent = if stage_percent.is_finite() {
            stage_percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let target = match stage {
            Stage::Completed | Stage::FallbackCompleted => 100.0,
            Stage::Failed => self.overall,
            working => working.progress_offset() + working.progress_weight() * stage_percent / 100.0,
        };
        self.overall = self.overall.max(target).min(100.0);

        let event = ProgressEvent {
            job_id: self.job_id,
            stage,
            stage_percent,
            overall_percent: self.overall,
            message: message.into(),
            at: Utc::now(),
        };
        info!(
            job_id = %self.job_id,
            stage = %stage,
            overall = format_args!("{:.1}", self.overall),
            "{}",
            event.message
        );
        if let Some(sender) = &self.sender
            && sender.send(event.clone()).is_err()
        {
            debug!(job_id = %self.job_id, "Progress receiver closed; continuing without it");
            self.sender = None;
        }
        event
    }
}
