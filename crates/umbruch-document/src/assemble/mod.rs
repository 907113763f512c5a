// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Assemble module: chapter markup, stylesheet choice, package validation, and
// the EPUB container writer.

pub mod assembler;
pub mod epub;
pub mod markup;
pub mod stylesheet;

pub use assembler::{AssemblyInput, OutputAssembler, PackageAssembler, validate_package};
pub use epub::{write_epub, write_epub_to};
pub use stylesheet::{primary_language, stylesheet_for};
