// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Script detection and line confidence heuristics over recognized text.

use umbruch_core::Script;

/// More than this many ideographs in a sample marks it CJK outright.
const CJK_CHAR_COUNT: usize = 10;
/// Share of letters that must be CJK when the sample is small.
const CJK_LETTER_SHARE: f32 = 0.3;

const COMMON_PUNCTUATION: &str = ".,;:!?'\"()[]-–—…%/&*#@+=«»“”‘’、。，「」『』！？：；（）·〈〉《》";

/// CJK unified ideographs, kana, and hangul syllables.
pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{3040}'..='\u{30FF}' | '\u{AC00}'..='\u{D7AF}')
}

fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '\u{00C0}'..='\u{024F}' if c.is_alphabetic())
}

/// Character counts used by the script heuristics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSample {
    pub cjk: usize,
    pub latin: usize,
    pub other_letters: usize,
}

impl ScriptSample {
    pub fn of(text: &str) -> Self {
        let mut sample = Self::default();
        for c in text.chars() {
            if is_cjk(c) {
                sample.cjk += 1;
            } else if is_latin(c) {
                sample.latin += 1;
            } else if c.is_alphabetic() {
                sample.other_letters += 1;
            }
        }
        sample
    }

    pub fn letters(&self) -> usize {
        self.cjk + self.latin + self.other_letters
    }

    /// Share of letters that are CJK, 0 for a sample without letters.
    pub fn cjk_share(&self) -> f32 {
        match self.letters() {
            0 => 0.0,
            letters => self.cjk as f32 / letters as f32,
        }
    }

    pub fn script(&self) -> Script {
        if self.cjk > CJK_CHAR_COUNT || (self.cjk > 0 && self.cjk_share() > CJK_LETTER_SHARE) {
            Script::Cjk
        } else if self.latin > 0 && self.latin >= self.other_letters {
            Script::Latin
        } else if self.other_letters > 0 {
            Script::Other
        } else {
            Script::default()
        }
    }
}

/// Detect the dominant script of a text sample. Text without letters is
/// treated as Latin.
pub fn detect_script(text: &str) -> Script {
    ScriptSample::of(text).script()
}

fn is_plausible(c: char) -> bool {
    c.is_alphanumeric() || COMMON_PUNCTUATION.contains(c)
}

/// Heuristic line confidence, 0 to 100: the share of non-space characters
/// that are letters, digits, ideographs, or common punctuation.
pub fn line_confidence(text: &str) -> f32 {
    let (plausible, total) = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .fold((0usize, 0usize), |(plausible, total), c| {
            (plausible + usize::from(is_plausible(c)), total + 1)
        });
    if total == 0 {
        return 0.0;
    }
    plausible as f32 / total as f32 * 100.0
}
