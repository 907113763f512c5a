// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Small accessors over lopdf objects: reference resolution, numbers, names,
// and PDF text-string decoding.

use lopdf::{Dictionary, Document, Object, ObjectId};

/// Maximum `Parent` hops followed when resolving inherited page attributes.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Follow a reference to its target; other objects are returned as-is.
pub(crate) fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

pub(crate) fn dict_get<'a>(document: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|value| resolve(document, value))
}

pub(crate) fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

pub(crate) fn name(object: &Object) -> Option<&[u8]> {
    match object {
        Object::Name(bytes) => Some(bytes),
        _ => None,
    }
}

/// Look up `key` on a page dictionary, walking the `Parent` chain for
/// inheritable attributes (`Resources`, `MediaBox`).
pub(crate) fn inherited<'a>(document: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = document.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Some(value) = dict_get(document, current, key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?;
        current = resolve_dict(document, parent)?;
    }
    None
}

/// Decode a PDF text string: UTF-16BE with a byte-order mark, otherwise
/// PDFDocEncoding (latin-1 with a punctuation block at 0x80..0xA0).
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if bytes.len() >= 3 && bytes[..3] == [0xEF, 0xBB, 0xBF] {
        return String::from_utf8_lossy(&bytes[3..]).into_owned();
    }
    bytes.iter().map(|&byte| pdf_doc_char(byte)).collect()
}

fn pdf_doc_char(byte: u8) -> char {
    match byte {
        0x80 => '\u{2022}',
        0x81 => '\u{2020}',
        0x82 => '\u{2021}',
        0x83 => '\u{2026}',
        0x84 => '\u{2014}',
        0x85 => '\u{2013}',
        0x86 => '\u{0192}',
        0x87 => '\u{2044}',
        0x88 => '\u{2039}',
        0x89 => '\u{203A}',
        0x8A => '\u{2212}',
        0x8B => '\u{2030}',
        0x8C => '\u{201E}',
        0x8D => '\u{201C}',
        0x8E => '\u{201D}',
        0x8F => '\u{2018}',
        0x90 => '\u{2019}',
        0x91 => '\u{201A}',
        0x92 => '\u{2122}',
        0x93 => '\u{FB01}',
        0x94 => '\u{FB02}',
        0x95 => '\u{0141}',
        0x96 => '\u{0152}',
        0x97 => '\u{0160}',
        0x98 => '\u{0178}',
        0x99 => '\u{017D}',
        0x9A => '\u{0131}',
        0x9B => '\u{0142}',
        0x9C => '\u{0153}',
        0x9D => '\u{0161}',
        0x9E => '\u{017E}',
        0xA0 => '\u{20AC}',
        other => other as char,
    }
}

/// Decode a string-valued entry, trimming whitespace and dropping empty values.
pub(crate) fn text_entry(document: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict_get(document, dict, key)? {
        Object::String(bytes, _) => {
            let text = decode_text_string(bytes).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Object::Name(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_strings_decode() {
        let bytes = [0xFE, 0xFF, 0x7B, 0x2C, 0x4E, 0x00, 0x7A, 0xE0];
        assert_eq!(decode_text_string(&bytes), "第一章");
    }

    #[test]
    fn pdfdoc_punctuation_decodes() {
        let bytes = [b'A', 0x84, b'B', 0x8D, b'q', 0x8E];
        assert_eq!(decode_text_string(&bytes), "A\u{2014}B\u{201C}q\u{201D}");
    }

    #[test]
    fn latin1_passes_through() {
        assert_eq!(decode_text_string(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }
}
