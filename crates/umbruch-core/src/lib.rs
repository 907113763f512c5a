// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Umbruch: Core types, configuration, and error definitions shared across all
// crates of the conversion pipeline.

pub mod chapter;
pub mod config;
pub mod error;
pub mod human_errors;
pub mod package;
pub mod quality;
pub mod types;

pub use chapter::{ChapterBoundary, ChapterTree, DetectionMethod, NavNode};
pub use config::{ConversionConfig, PresetProfile};
pub use error::{Result, UmbruchError};
pub use package::OutputPackage;
pub use quality::{QualityReport, QualityWarning, QualityWeights, WarningKind};
pub use types::*;
