// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Umbruch.
//
// Low-confidence results are not errors: they are recorded as
// `WarningKind::LowConfidence` entries on the quality report.

use std::time::Duration;

use thiserror::Error;

use crate::types::Stage;

/// Top-level error type for all Umbruch operations.
#[derive(Debug, Error)]
pub enum UmbruchError {
    // -- Source document --
    #[error("cannot parse source document: {0}")]
    Parse(String),

    // -- Budgets and resources --
    #[error("{stage} exceeded its budget of {budget:?}")]
    StageTimeout { stage: Stage, budget: Duration },

    #[error("resource limit exceeded: {0}")]
    ResourceExhaustion(String),

    #[error("job was cancelled")]
    Cancelled,

    // -- Stage failures --
    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("image processing failed: {0}")]
    Image(String),

    #[error("content enhancer failed: {0}")]
    Enhancer(String),

    #[error("output package failed validation: {0}")]
    AssemblyValidation(String),

    #[error("external conversion engine failed: {0}")]
    FallbackInvocation(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / serialization --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UmbruchError {
    /// Build a timeout error for `stage` with the budget that was exceeded.
    pub fn timeout(stage: Stage, budget: Duration) -> Self {
        Self::StageTimeout { stage, budget }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, UmbruchError>;
