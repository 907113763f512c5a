// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text heuristics for headings.

use std::sync::LazyLock;

use regex::Regex;

/// Headings longer than this are prose.
const MAX_HEADING_CHARS: usize = 100;

// -- Numbered headings --
static RE_CHAPTER_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(chapter|part|section|book|appendix)\s+([0-9]+|[ivxlcdm]+|[a-z])\b")
        .expect("valid chapter word regex")
});
static RE_CJK_CHAPTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(第\s*[0-9一二三四五六七八九十百千零〇两]+\s*[章节部篇回卷]|(章|部分|节)\s*[0-9]+)")
        .expect("valid cjk chapter regex")
});
static RE_DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3}(?:\.\d{1,3})*)(\.)?\s+\S").expect("valid decimal heading regex")
});
static RE_ROMAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[IVXLCDM]+\.\s+\S").expect("valid roman heading regex"));
static RE_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\.\s+\S").expect("valid letter heading regex"));

const SENTENCE_ENDINGS: &[char] = &['.', '!', '?', ',', ';', '。', '！', '？', '，', '；'];
const CONNECTIVES: &[&str] = &["and", "or", "but", "because", "which", "so", "then"];

/// "Chapter 3", "Part II", "第三章", "1. Introduction", "2.1 Scope", "IV. Results", "A. Notes".
pub fn is_numbered_heading(text: &str) -> bool {
    let text = text.trim();
    if text.chars().count() > MAX_HEADING_CHARS {
        return false;
    }
    RE_CHAPTER_WORD.is_match(text)
        || RE_CJK_CHAPTER.is_match(text)
        || RE_ROMAN.is_match(text)
        || RE_LETTER.is_match(text)
        || RE_DECIMAL.captures(text).is_some_and(|caps| {
            // A bare number needs a trailing dot; "1998 was" is prose.
            caps.get(2).is_some() || caps.get(1).is_some_and(|number| number.as_str().contains('.'))
        })
}

/// Depth of a decimal section number: "2." is 1, "2.1" is 2, "2.1.3" is 3.
pub fn numbering_depth(text: &str) -> Option<u8> {
    let caps = RE_DECIMAL.captures(text.trim())?;
    let number = caps.get(1)?.as_str();
    Some(number.split('.').count().min(u8::MAX as usize) as u8)
}

/// Short, free of sentence punctuation at the end, and not opening with a
/// lowercase word or connective. Numbered headings always qualify.
pub fn is_heading_like(text: &str) -> bool {
    let text = text.trim();
    let chars = text.chars().count();
    if chars < 2 || chars > MAX_HEADING_CHARS || !text.chars().any(char::is_alphabetic) {
        return false;
    }
    if is_numbered_heading(text) {
        return true;
    }
    if text.ends_with(SENTENCE_ENDINGS) {
        return false;
    }
    let Some(first_word) = text.split_whitespace().next() else {
        return false;
    };
    if first_word.chars().next().is_some_and(char::is_lowercase) {
        return false;
    }
    !CONNECTIVES.contains(&first_word.to_lowercase().as_str())
}

/// Collapse whitespace runs and trim, for titles taken from text blocks.
pub fn clean_title(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
