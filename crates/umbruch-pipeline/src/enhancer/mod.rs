// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content enhancer: optional AI collaborator for metadata, chapter titles,
// recognized-text cleanup, and boundary suggestions.
//
// Every call may fail or time out. The orchestrator treats both as a degraded
// result and keeps the parser-derived values.

pub mod openai;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use umbruch_core::{DocumentMetadata, Result};
use umbruch_document::structure::SuggestedBoundary;

pub use openai::OpenAiCompatibleEnhancer;

/// Metadata guessed from a text sample. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl InferredMetadata {
    /// Drop blank values and trim the rest.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null") && !v.eq_ignore_ascii_case("unknown"))
        }
        Self {
            title: clean(self.title),
            author: clean(self.author),
            language: clean(self.language),
        }
    }
}

/// The three content-enhancement capabilities.
#[async_trait]
pub trait ContentEnhancer: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    async fn infer_metadata(&self, sample: &str) -> Result<Option<InferredMetadata>>;

    /// A concise title for the chapter starting with `excerpt`.
    async fn refine_chapter_title(&self, excerpt: &str) -> Result<Option<String>>;

    /// Corrected text for a low-confidence recognition. `confidence_hint` is 0–100.
    async fn improve_text(&self, text: &str, confidence_hint: f32) -> Result<Option<String>>;
}

/// Content-analysis signal for structure detection.
#[async_trait]
pub trait BoundaryAdvisor: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// Chapter starts found in a weak-region excerpt (`Page N:` sections, 1-based).
    async fn suggest_boundaries(&self, excerpt: &str) -> Result<Vec<SuggestedBoundary>>;
}

/// Stand-in when no enhancer is configured. Never available, never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnhancer;

#[async_trait]
impl ContentEnhancer for NoopEnhancer {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn infer_metadata(&self, _sample: &str) -> Result<Option<InferredMetadata>> {
        Ok(None)
    }

    async fn refine_chapter_title(&self, _excerpt: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn improve_text(&self, _text: &str, _confidence_hint: f32) -> Result<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
impl BoundaryAdvisor for NoopEnhancer {
    fn is_available(&self) -> bool {
        false
    }

    async fn suggest_boundaries(&self, _excerpt: &str) -> Result<Vec<SuggestedBoundary>> {
        Ok(Vec::new())
    }
}

// -- Metadata merge -------------------------------------------------------------

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\w.\- ]+\.(pdf|docx?|rtf|odt|tex|indd|qxd|pages)$").expect("valid file name regex")
});

static GENERATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(untitled|document\d*|book\d*|scan[\s_\-]?\d*|img[\s_\-]?\d+|microsoft word\s*-.*|title|new document)$")
        .expect("valid placeholder title regex")
});

/// Whether a parser title says nothing about the book.
///
/// `source_stem` is the input file name without extension; a title equal to
/// it was most likely filled in by the authoring tool.
pub fn is_placeholder_title(title: &str, source_stem: Option<&str>) -> bool {
    let title = title.trim();
    if title.chars().filter(|c| c.is_alphanumeric()).count() < 2 {
        return true;
    }
    if FILE_NAME.is_match(title) || GENERATED.is_match(title) {
        return true;
    }
    source_stem.is_some_and(|stem| title.eq_ignore_ascii_case(stem.trim()))
}

/// Merge inferred metadata into what the parser found.
///
/// Parser values win. Inferred values fill gaps, and an inferred title also
/// replaces a placeholder parser title.
pub fn merge_metadata(
    parsed: &DocumentMetadata,
    inferred: InferredMetadata,
    source_stem: Option<&str>,
) -> DocumentMetadata {
    let inferred = inferred.normalized();
    let mut merged = parsed.clone();

    let parsed_title_usable = parsed
        .title
        .as_deref()
        .is_some_and(|title| !is_placeholder_title(title, source_stem));
    if !parsed_title_usable && inferred.title.is_some() {
        merged.title = inferred.title;
    }
    if merged.author.as_deref().is_none_or(|a| a.trim().is_empty()) {
        merged.author = inferred.author.or(merged.author);
    }
    if merged.language.as_deref().is_none_or(|l| l.trim().is_empty()) {
        merged.language = inferred.language.or(merged.language);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(title: Option<&str>, author: Option<&str>) -> DocumentMetadata {
        DocumentMetadata {
            title: title.map(str::to_string),
            author: author.map(str::to_string),
            ..DocumentMetadata::default()
        }
    }

    fn inferred(title: &str, author: &str, language: &str) -> InferredMetadata {
        InferredMetadata {
            title: Some(title.into()),
            author: Some(author.into()),
            language: Some(language.into()),
        }
    }

    #[test]
    fn parser_values_win() {
        let merged = merge_metadata(
            &parsed(Some("The Long Winter"), Some("L. Ingalls")),
            inferred("Winter Stories", "Someone Else", "en"),
            Some("long-winter"),
        );
        assert_eq!(merged.title.as_deref(), Some("The Long Winter"));
        assert_eq!(merged.author.as_deref(), Some("L. Ingalls"));
        assert_eq!(merged.language.as_deref(), Some("en"));
    }

    #[test]
    fn placeholder_title_is_replaced() {
        let merged = merge_metadata(
            &parsed(Some("manuscript_v3.docx"), None),
            inferred("A Field Guide to Mosses", "R. Moss", "en"),
            None,
        );
        assert_eq!(merged.title.as_deref(), Some("A Field Guide to Mosses"));
        assert_eq!(merged.author.as_deref(), Some("R. Moss"));
    }

    #[test]
    fn blank_inferred_values_are_ignored() {
        let merged = merge_metadata(
            &parsed(None, None),
            InferredMetadata {
                title: Some("  ".into()),
                author: Some("null".into()),
                language: None,
            },
            None,
        );
        assert_eq!(merged, DocumentMetadata::default());
    }

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder_title("Untitled", None));
        assert!(is_placeholder_title("Microsoft Word - draft final", None));
        assert!(is_placeholder_title("scan_0042", None));
        assert!(is_placeholder_title("report", Some("Report")));
        assert!(is_placeholder_title("-", None));
        assert!(!is_placeholder_title("Mosses of the Northern Forest", Some("mosses")));
    }

    #[tokio::test]
    async fn noop_enhancer_answers_nothing() {
        let enhancer: &dyn ContentEnhancer = &NoopEnhancer;
        assert!(!enhancer.is_available());
        assert_eq!(enhancer.infer_metadata("sample").await.ok().flatten(), None);
        let advisor: &dyn BoundaryAdvisor = &NoopEnhancer;
        assert!(advisor.suggest_boundaries("Page 1:\nText").await.map(|s| s.is_empty()).unwrap_or(false));
    }
}
