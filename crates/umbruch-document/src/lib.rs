// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// umbruch-document: Synchronous document processing for the Umbruch pipeline.
//
// Provides PDF parsing (text blocks, images, outline, metadata), layout analysis
// (columns, reading order, tables), scanned-page recognition, chapter structure
// detection, image optimisation, and EPUB assembly.

pub mod assemble;
pub mod image;
pub mod layout;
pub mod pdf;
pub mod recognition;
pub mod structure;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

// Re-export the primary structs so callers can use `umbruch_document::PdfReader` etc.
pub use assemble::{AssemblyInput, OutputAssembler, PackageAssembler, write_epub};
pub use image::processor::{ImageProcessor, ImageStats};
pub use layout::{LayoutAnalyzer, PageLayout};
pub use pdf::{DocumentSummary, ExtractedPage, PdfReader};
pub use recognition::{
    EmbeddedImageRenderer, NoRecognizer, PageRecognition, PageRenderer, RecognitionEngine,
    RenderedPage, TextRecognizer,
};
pub use structure::{StructureDetector, StructureInput, StructureOutcome};

#[cfg(feature = "ocr")]
pub use recognition::ocr::OcrsRecognizer;
