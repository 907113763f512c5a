// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image module: classification, budgeted re-encoding, and text association.

pub mod association;
pub mod processor;

pub use association::{Association, associate};
pub use processor::{ImageProcessor, ImageSettings, ImageStats, OptimizedImage};
