// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition module: rendering scanned pages, cleaning them up, and turning
// recognized lines into text blocks.

pub mod engine;
#[cfg(feature = "ocr")]
pub mod ocr;
pub mod preprocess;
pub mod render;
pub mod script;

pub use engine::{
    NoRecognizer, PageRecognition, RecognitionEngine, TextRecognizer, recognized_blocks,
};
pub use render::{EmbeddedImageRenderer, PageRenderer, RenderedPage};
pub use script::detect_script;
