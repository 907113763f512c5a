// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for people converting their documents.
//
// Every technical error is mapped to plain English with a clear suggestion.
// The severity drives how a front end presents the failure.

use crate::error::UmbruchError;
use crate::types::Stage;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Temporary condition; running the conversion again may succeed.
    Transient,
    /// The user must change something (file, settings, installed tools).
    ActionRequired,
    /// This document cannot be converted as it is.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether retrying the same job is worthwhile.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert an `UmbruchError` into a `HumanError`.
pub fn humanize_error(err: &UmbruchError) -> HumanError {
    match err {
        UmbruchError::Parse(detail) => humanize_parse_error(detail),

        UmbruchError::StageTimeout { stage, .. } => HumanError {
            message: format!("The {} step took too long.", stage_phrase(*stage)),
            suggestion: "Try the fast quality setting, or convert a shorter document.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        UmbruchError::ResourceExhaustion(detail) => HumanError {
            message: "This document is too large to convert.".into(),
            suggestion: format!(
                "Split the document into smaller parts and convert them one at a time. ({detail})"
            ),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        UmbruchError::Cancelled => HumanError {
            message: "The conversion was cancelled.".into(),
            suggestion: "Start the conversion again when you are ready.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        UmbruchError::Recognition(_) => HumanError {
            message: "Text recognition didn't work on the scanned pages.".into(),
            suggestion: "Check that the scan is sharp and upright, or try the high quality setting.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        UmbruchError::Image(_) => HumanError {
            message: "An image in this document couldn't be processed.".into(),
            suggestion: "The image may be damaged or in an unusual format. Try re-saving the PDF from its original application.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        UmbruchError::Enhancer(_) => HumanError {
            message: "The text enhancement service isn't responding.".into(),
            suggestion: "The conversion continues without it. Check your network connection or the service settings.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        UmbruchError::AssemblyValidation(_) => HumanError {
            message: "The converted book didn't pass its final checks.".into(),
            suggestion: "Try again with the external converter enabled.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        UmbruchError::FallbackInvocation(detail) => humanize_engine_error(detail),

        UmbruchError::Config(detail) => HumanError {
            message: "The conversion settings aren't valid.".into(),
            suggestion: format!("Fix the configuration and try again. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        UmbruchError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound => HumanError {
                message: "The file couldn't be found.".into(),
                suggestion: "It may have been moved or deleted. Check the path and try again.".into(),
                retriable: false,
                severity: Severity::ActionRequired,
            },
            std::io::ErrorKind::PermissionDenied => HumanError {
                message: "Umbruch doesn't have permission to use that file.".into(),
                suggestion: "Check the file permissions, or copy the file somewhere else first.".into(),
                retriable: false,
                severity: Severity::ActionRequired,
            },
            _ => HumanError {
                message: "There was a problem reading or writing a file.".into(),
                suggestion: "Try again. If this keeps happening, the disk may be full.".into(),
                retriable: true,
                severity: Severity::Transient,
            },
        },

        UmbruchError::Serialization(_) => HumanError {
            message: "Umbruch had an internal data problem.".into(),
            suggestion: "Try again. If this keeps happening, please report it.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

fn stage_phrase(stage: Stage) -> &'static str {
    match stage {
        Stage::Analysis => "document analysis",
        Stage::Extraction => "text extraction",
        Stage::Recognition => "text recognition",
        Stage::Structure => "chapter detection",
        Stage::Enhancement => "text enhancement",
        Stage::Generation => "book generation",
        Stage::Completed | Stage::FallbackCompleted | Stage::Failed => "conversion",
    }
}

fn humanize_parse_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("encrypt") || lower.contains("password") {
        HumanError {
            message: "This PDF is protected.".into(),
            suggestion: "Remove the password protection in your PDF application, then convert the unprotected copy.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("no pages") {
        HumanError {
            message: "This PDF has no pages.".into(),
            suggestion: "Check that you picked the right file.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else {
        HumanError {
            message: "There's a problem with this PDF file.".into(),
            suggestion: "The file may be damaged. Try opening it in a PDF viewer first, or re-export it.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    }
}

fn humanize_engine_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("not found") || lower.contains("no such file") || lower.contains("not configured") {
        HumanError {
            message: "The external converter isn't installed.".into(),
            suggestion: "Install Calibre (which provides ebook-convert) and make sure it is on your PATH.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("timed out") {
        HumanError {
            message: "The external converter took too long.".into(),
            suggestion: "Try a shorter document, or raise the engine timeout in the settings.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else {
        HumanError {
            message: "Neither converter could produce a book from this document.".into(),
            suggestion: format!("The document may be unusual or damaged. (Detail: {detail})"),
            retriable: false,
            severity: Severity::Permanent,
        }
    }
}
