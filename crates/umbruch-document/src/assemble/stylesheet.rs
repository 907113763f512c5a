// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Script-specific stylesheets and primary language selection.

use umbruch_core::package::Stylesheet;
use umbruch_core::{DocumentMetadata, Script};

use crate::recognition::script::ScriptSample;

/// Path of the stylesheet inside the package.
pub const STYLESHEET_HREF: &str = "styles/book.css";

const CJK_CSS: &str = r#"body {
  margin: 0 5%;
  line-height: 1.8;
  text-align: justify;
  text-justify: inter-character;
  hyphens: none;
  -epub-hyphens: none;
  line-break: strict;
  -epub-line-break: strict;
  word-break: normal;
  hanging-punctuation: allow-end last;
}

p {
  margin: 0;
  text-indent: 2em;
}
"#;

const LATIN_CSS: &str = r#"body {
  margin: 0 5%;
  font-family: Georgia, "Times New Roman", serif;
  line-height: 1.6;
  text-align: justify;
  hyphens: auto;
  -epub-hyphens: auto;
}

p {
  margin: 0 0 0.8em 0;
  text-indent: 0;
}
"#;

const SHARED_CSS: &str = r#"
.chapter-title {
  margin: 2em 0 1em 0;
  text-align: left;
  text-indent: 0;
  hyphens: none;
  page-break-after: avoid;
}

.chapter-content figure {
  margin: 1em 0;
  text-align: center;
  text-indent: 0;
}

.chapter-content img {
  max-width: 100%;
  height: auto;
}

.chapter-content table {
  border-collapse: collapse;
  margin: 1em 0;
}

.chapter-content td {
  border: 1px solid #999;
  padding: 0.2em 0.4em;
  text-indent: 0;
}
"#;

/// Stylesheet for the primary script. Scripts other than CJK use the Latin rules.
pub fn stylesheet_for(script: Script) -> Stylesheet {
    let body = match script {
        Script::Cjk => CJK_CSS,
        Script::Latin | Script::Other => LATIN_CSS,
    };
    Stylesheet {
        script,
        href: STYLESHEET_HREF.to_string(),
        css: format!("{body}{SHARED_CSS}"),
    }
}

/// Primary script and language tag of the document text.
///
/// An explicit metadata language wins; its script is still taken from the text
/// unless the tag itself names a CJK language.
pub fn primary_language<'a>(
    metadata: &DocumentMetadata,
    text: impl IntoIterator<Item = &'a str>,
) -> (Script, String) {
    let mut sample = ScriptSample::default();
    for fragment in text {
        let part = ScriptSample::of(fragment);
        sample.cjk += part.cjk;
        sample.latin += part.latin;
        sample.other_letters += part.other_letters;
    }
    let detected = if sample.cjk_share() > 0.3 {
        Script::Cjk
    } else if sample.letters() > 0 && sample.latin == 0 && sample.cjk == 0 {
        Script::Other
    } else {
        Script::Latin
    };

    match metadata.language.as_deref().map(str::trim).filter(|tag| !tag.is_empty()) {
        Some(tag) => {
            let script = if is_cjk_language(tag) { Script::Cjk } else { detected };
            (script, tag.to_string())
        }
        None => (detected, detected.default_language().to_string()),
    }
}

fn is_cjk_language(tag: &str) -> bool {
    let primary = tag.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
    matches!(primary.as_str(), "zh" | "ja" | "ko")
}
