// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error classification for stage failures.
//
// Every error raised inside a stage is sorted into one of three outcomes:
// Recoverable (record a warning and continue with degraded output),
// Escalate (hand the job to the external engine), or Abort (fail the job).

use tracing::debug;
use umbruch_core::{Stage, UmbruchError};

/// What the orchestrator does with a stage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep going without the failed piece.
    Recoverable,
    /// Abandon the custom result and run the external engine.
    Escalate,
    /// Stop the job.
    Abort,
}

/// Stages whose output the job can do without.
pub fn is_optional(stage: Stage) -> bool {
    matches!(stage, Stage::Recognition | Stage::Enhancement)
}

/// Classify an error raised while `stage` was running.
pub fn classify_error(err: &UmbruchError, stage: Stage) -> Disposition {
    let disposition = match err {
        // Nothing downstream can help.
        UmbruchError::Cancelled => Disposition::Abort,
        UmbruchError::ResourceExhaustion(_) => Disposition::Abort,
        UmbruchError::Parse(_) => Disposition::Abort,
        UmbruchError::Config(_) => Disposition::Abort,
        UmbruchError::FallbackInvocation(_) => Disposition::Abort,

        UmbruchError::StageTimeout { stage: timed_out, .. } => {
            if is_optional(*timed_out) {
                Disposition::Recoverable
            } else {
                Disposition::Escalate
            }
        }

        // Per-page and per-call failures degrade the result.
        UmbruchError::Recognition(_) => Disposition::Recoverable,
        UmbruchError::Enhancer(_) => Disposition::Recoverable,
        UmbruchError::Image(_) => Disposition::Recoverable,

        UmbruchError::AssemblyValidation(_) => Disposition::Escalate,
        UmbruchError::Serialization(_) => Disposition::Escalate,

        // An unreadable input file cannot be converted by anyone.
        UmbruchError::Io(_) if stage == Stage::Analysis => Disposition::Abort,
        UmbruchError::Io(_) => Disposition::Escalate,
    };
    debug!(stage = %stage, ?disposition, error = %err, "Classified stage error");
    disposition
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancellation_always_aborts() {
        for stage in Stage::WORKING {
            assert_eq!(classify_error(&UmbruchError::Cancelled, stage), Disposition::Abort);
        }
    }

    #[test]
    fn optional_stage_timeouts_are_recoverable() {
        let err = UmbruchError::timeout(Stage::Enhancement, Duration::from_secs(30));
        assert_eq!(classify_error(&err, Stage::Enhancement), Disposition::Recoverable);
        let err = UmbruchError::timeout(Stage::Recognition, Duration::from_secs(60));
        assert_eq!(classify_error(&err, Stage::Recognition), Disposition::Recoverable);
    }

    #[test]
    fn required_stage_timeouts_escalate() {
        let err = UmbruchError::timeout(Stage::Generation, Duration::from_secs(300));
        assert_eq!(classify_error(&err, Stage::Generation), Disposition::Escalate);
        let err = UmbruchError::timeout(Stage::Structure, Duration::from_secs(120));
        assert_eq!(classify_error(&err, Stage::Structure), Disposition::Escalate);
    }

    #[test]
    fn invalid_package_escalates() {
        let err = UmbruchError::AssemblyValidation("navigation target missing".into());
        assert_eq!(classify_error(&err, Stage::Generation), Disposition::Escalate);
    }

    #[test]
    fn io_depends_on_stage() {
        let io = || UmbruchError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(classify_error(&io(), Stage::Analysis), Disposition::Abort);
        assert_eq!(classify_error(&io(), Stage::Generation), Disposition::Escalate);
    }

    #[test]
    fn collaborator_failures_are_recoverable() {
        let err = UmbruchError::Enhancer("HTTP 503".into());
        assert_eq!(classify_error(&err, Stage::Enhancement), Disposition::Recoverable);
        let err = UmbruchError::Recognition("model missing".into());
        assert_eq!(classify_error(&err, Stage::Recognition), Disposition::Recoverable);
    }

    #[test]
    fn failed_fallback_is_fatal() {
        let err = UmbruchError::FallbackInvocation("engine exited with status 1".into());
        assert_eq!(classify_error(&err, Stage::Generation), Disposition::Abort);
    }
}
