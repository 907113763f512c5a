// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cooperative job cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use umbruch_core::{Result, UmbruchError};

/// Shared cancellation token for one job.
///
/// Checked by the orchestrator between stages and by the worker pool before
/// each page or image.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the job has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(UmbruchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = CancellationFlag::new();
        let observer = flag.clone();
        assert!(observer.check().is_ok());
        flag.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(UmbruchError::Cancelled)));
    }
}
