// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory PDF fixtures for tests and benchmarks.
//
// Builds small A4 documents with lopdf: prose pages with a bold heading,
// two-column pages, full-page scans, embedded figures, an outline, and an
// Info dictionary. Compiled for tests and under the `fixtures` feature.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use umbruch_core::{Result, UmbruchError};

pub const PAGE_WIDTH: i64 = 595;
pub const PAGE_HEIGHT: i64 = 842;

const MARGIN: i64 = 72;
const BODY_SIZE: i64 = 11;
const BODY_LEADING: i64 = 14;
const HEADING_SIZE: i64 = 20;
const PARAGRAPH_GAP: i64 = 12;
const LINE_CHARS: usize = 80;
const COLUMN_CHARS: usize = 40;
const LINES_PER_PARAGRAPH: usize = 5;
const MAX_PARAGRAPHS: usize = 8;

const WORDS: &[&str] = &[
    "the", "river", "carried", "light", "across", "worn", "stones", "while", "evening",
    "settled", "over", "quiet", "fields", "and", "distant", "bells", "answered", "a",
    "patient", "wind", "that", "moved", "through", "orchards", "where", "nobody", "had",
    "walked", "since", "early", "spring", "letters", "waited", "on", "kitchen", "tables",
    "for", "readers", "who", "understood", "silence", "better", "than", "argument",
];

// -- Page descriptions --------------------------------------------------------

/// An image placed on a fixture page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureImage {
    /// Noisy RGB gradient, embedded as a JPEG (`DCTDecode`).
    Photo { width: u32, height: u32 },
    /// Flat shapes on white, embedded as raw RGB samples.
    Diagram { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq)]
enum PageKind {
    Prose {
        heading: Option<String>,
        paragraphs: usize,
    },
    Columns {
        paragraphs: usize,
    },
    Scanned {
        seed: u8,
    },
    Blank,
}

/// One page of a fixture document.
#[derive(Debug, Clone, PartialEq)]
pub struct FixturePage {
    kind: PageKind,
    figures: Vec<FixtureImage>,
}

impl FixturePage {
    /// Body text, optionally preceded by a 20pt bold heading.
    pub fn prose(heading: Option<&str>, paragraphs: usize) -> Self {
        Self {
            kind: PageKind::Prose {
                heading: heading.map(str::to_string),
                paragraphs: paragraphs.clamp(1, MAX_PARAGRAPHS),
            },
            figures: Vec::new(),
        }
    }

    /// Two text columns separated by a 39pt gutter.
    pub fn columns(paragraphs: usize) -> Self {
        Self {
            kind: PageKind::Columns {
                paragraphs: paragraphs.clamp(1, MAX_PARAGRAPHS),
            },
            figures: Vec::new(),
        }
    }

    /// A page that is a single full-page grayscale scan with no text layer.
    pub fn scanned(seed: u8) -> Self {
        Self {
            kind: PageKind::Scanned { seed },
            figures: Vec::new(),
        }
    }

    pub fn blank() -> Self {
        Self {
            kind: PageKind::Blank,
            figures: Vec::new(),
        }
    }

    /// Place a figure below the page text.
    pub fn with_figure(mut self, figure: FixtureImage) -> Self {
        self.figures.push(figure);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OutlineItem {
    title: String,
    page: usize,
    children: Vec<(String, usize)>,
}

// -- Document builder ---------------------------------------------------------

/// Builder for an in-memory PDF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureDocument {
    title: Option<String>,
    author: Option<String>,
    language: Option<String>,
    pages: Vec<FixturePage>,
    outline: Vec<OutlineItem>,
}

impl FixtureDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn page(mut self, page: FixturePage) -> Self {
        self.pages.push(page);
        self
    }

    pub fn pages(mut self, pages: impl IntoIterator<Item = FixturePage>) -> Self {
        self.pages.extend(pages);
        self
    }

    /// Top-level bookmark pointing at the top of `page` (0-indexed).
    pub fn outline_entry(mut self, title: &str, page: usize) -> Self {
        self.outline.push(OutlineItem {
            title: title.to_string(),
            page,
            children: Vec::new(),
        });
        self
    }

    /// Second-level bookmark under the most recent top-level entry.
    pub fn outline_child(mut self, title: &str, page: usize) -> Self {
        match self.outline.last_mut() {
            Some(parent) => {
                parent.children.push((title.to_string(), page));
                self
            }
            None => self.outline_entry(title, page),
        }
    }

    /// Serialize the document.
    pub fn try_build(&self) -> Result<Vec<u8>> {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();

        let regular = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let bold = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
        });
        let fonts = dictionary! { "F1" => regular, "F2" => bold };

        let mut page_ids = Vec::with_capacity(self.pages.len());
        for (index, page) in self.pages.iter().enumerate() {
            let page_id = write_page(&mut document, pages_id, &fonts, page, index)?;
            page_ids.push(page_id);
        }

        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => page_ids.len() as i64,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Resources" => dictionary! { "Font" => fonts.clone() },
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };
        if let Some(outlines_id) = write_outline(&mut document, &self.outline, &page_ids) {
            catalog.set("Outlines", outlines_id);
        }
        if let Some(language) = &self.language {
            catalog.set("Lang", text_string(language));
        }
        let catalog_id = document.add_object(catalog);
        document.trailer.set("Root", catalog_id);

        let mut info = Dictionary::new();
        if let Some(title) = &self.title {
            info.set("Title", text_string(title));
        }
        if let Some(author) = &self.author {
            info.set("Author", text_string(author));
        }
        info.set("Producer", text_string("umbruch fixtures"));
        let info_id = document.add_object(info);
        document.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        document
            .save_to(&mut bytes)
            .map_err(|err| UmbruchError::Parse(format!("failed to serialize fixture: {}", err)))?;
        Ok(bytes)
    }

    /// Serialize the document. Fixture documents are built from fixed parts,
    /// so serialization failure is a bug in the fixture itself.
    pub fn build(&self) -> Vec<u8> {
        self.try_build().expect("fixture document serializes")
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.try_build()?)?;
        Ok(())
    }
}

// -- Pages --------------------------------------------------------------------

fn write_page(
    document: &mut Document,
    pages_id: ObjectId,
    fonts: &Dictionary,
    page: &FixturePage,
    index: usize,
) -> Result<ObjectId> {
    let mut operations = Vec::new();
    let mut xobjects = Dictionary::new();
    let mut cursor = PAGE_HEIGHT - MARGIN;

    match &page.kind {
        PageKind::Prose {
            heading,
            paragraphs,
        } => {
            if let Some(heading) = heading {
                operations.extend(text_line("F2", HEADING_SIZE, MARGIN, cursor, heading));
                cursor -= HEADING_SIZE * 2;
            }
            for paragraph in 0..*paragraphs {
                let lines = paragraph_lines(index * 31 + paragraph * 7, LINE_CHARS);
                operations.extend(text_paragraph(MARGIN, cursor, &lines));
                cursor -= BODY_LEADING * lines.len() as i64 + PARAGRAPH_GAP;
            }
        }
        PageKind::Columns { paragraphs } => {
            let right = MARGIN + (COLUMN_CHARS as i64 * BODY_SIZE / 2) + 39;
            let mut left_cursor = cursor;
            let mut right_cursor = cursor;
            for paragraph in 0..*paragraphs {
                let lines = paragraph_lines(index * 17 + paragraph * 5, COLUMN_CHARS);
                operations.extend(text_paragraph(MARGIN, left_cursor, &lines));
                left_cursor -= BODY_LEADING * lines.len() as i64 + PARAGRAPH_GAP;
                let lines = paragraph_lines(index * 17 + paragraph * 5 + 3, COLUMN_CHARS);
                operations.extend(text_paragraph(right, right_cursor, &lines));
                right_cursor -= BODY_LEADING * lines.len() as i64 + PARAGRAPH_GAP;
            }
            cursor = left_cursor.min(right_cursor);
        }
        PageKind::Scanned { seed } => {
            let scan = scanned_image(*seed)?;
            let id = document.add_object(scan);
            xobjects.set("Scan", id);
            operations.extend(place_image("Scan", 0, 0, PAGE_WIDTH, PAGE_HEIGHT));
        }
        PageKind::Blank => {}
    }

    for (number, figure) in page.figures.iter().enumerate() {
        let (stream, width, height) = figure_image(*figure, index as u32 + number as u32)?;
        let id = document.add_object(stream);
        let key = format!("Im{}", number + 1);
        xobjects.set(key.as_bytes().to_vec(), id);

        let scale_width = i64::from(width).min(PAGE_WIDTH - 2 * MARGIN);
        let scale_height = i64::from(height) * scale_width / i64::from(width).max(1);
        let y = (cursor - 24 - scale_height).max(36);
        operations.extend(place_image(&key, MARGIN, y, scale_width, scale_height));
        cursor = y;
    }

    let content = Content { operations }
        .encode()
        .map_err(|err| UmbruchError::Parse(format!("failed to encode fixture page: {}", err)))?;
    let content_id = document.add_object(Stream::new(Dictionary::new(), content));

    let mut page_dict = dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    };
    // Pages with images carry their own resources; the rest inherit fonts.
    if !xobjects.is_empty() {
        page_dict.set(
            "Resources",
            dictionary! { "Font" => fonts.clone(), "XObject" => xobjects },
        );
    }
    Ok(document.add_object(page_dict))
}

fn op(operator: &str, operands: Vec<Object>) -> Operation {
    Operation::new(operator, operands)
}

fn text_line(font: &str, size: i64, x: i64, y: i64, text: &str) -> Vec<Operation> {
    vec![
        op("BT", vec![]),
        op("Tf", vec![font.into(), size.into()]),
        op("Td", vec![x.into(), y.into()]),
        op("Tj", vec![text_string(text)]),
        op("ET", vec![]),
    ]
}

fn text_paragraph(x: i64, y: i64, lines: &[String]) -> Vec<Operation> {
    let mut operations = vec![
        op("BT", vec![]),
        op("Tf", vec!["F1".into(), BODY_SIZE.into()]),
        op("TL", vec![BODY_LEADING.into()]),
        op("Td", vec![x.into(), y.into()]),
    ];
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            operations.push(op("T*", vec![]));
        }
        operations.push(op("Tj", vec![text_string(line)]));
    }
    operations.push(op("ET", vec![]));
    operations
}

fn place_image(key: &str, x: i64, y: i64, width: i64, height: i64) -> Vec<Operation> {
    vec![
        op("q", vec![]),
        op(
            "cm",
            vec![width.into(), 0.into(), 0.into(), height.into(), x.into(), y.into()],
        ),
        op("Do", vec![Object::Name(key.as_bytes().to_vec())]),
        op("Q", vec![]),
    ]
}

/// Deterministic sentence-like text wrapped to `width` characters.
pub fn paragraph_lines(seed: usize, width: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(LINES_PER_PARAGRAPH);
    let mut line = String::new();
    let mut word_index = seed;
    let mut first = true;
    while lines.len() < LINES_PER_PARAGRAPH {
        let mut word = WORDS[word_index % WORDS.len()].to_string();
        word_index += 1;
        if first {
            word[..1].make_ascii_uppercase();
            first = false;
        }
        if word_index % 11 == 0 {
            word.push('.');
            first = true;
        }
        if !line.is_empty() && line.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut line));
            line.push_str(&word);
            continue;
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&word);
    }
    if let Some(last) = lines.last_mut()
        && !last.ends_with('.')
    {
        last.push('.');
    }
    lines
}

/// Text string object: ASCII as a literal, anything else as UTF-16BE with a BOM.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

// -- Images -------------------------------------------------------------------

/// Small linear congruential generator for reproducible noise.
struct Noise(u32);

impl Noise {
    fn next(&mut self) -> u8 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (self.0 >> 24) as u8
    }
}

fn encode_jpeg(image: DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), 85);
    image
        .write_with_encoder(encoder)
        .map_err(|err| UmbruchError::Image(format!("failed to encode fixture JPEG: {}", err)))?;
    Ok(bytes)
}

/// Full-page scan: light paper with dark bands where lines of text would be.
fn scanned_image(seed: u8) -> Result<Stream> {
    let (width, height) = (298u32, 421u32);
    let mut noise = Noise(u32::from(seed) + 1);
    let image = GrayImage::from_fn(width, height, |x, y| {
        let in_text = x > 30 && x < width - 30 && y > 40 && y < height - 40;
        let on_line = (y / 4) % 3 == 0;
        let base: u8 = if in_text && on_line { 40 } else { 235 };
        Luma([base.saturating_add(noise.next() % 16)])
    });
    let bytes = encode_jpeg(DynamicImage::ImageLuma8(image))?;
    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        bytes,
    ))
}

fn figure_image(figure: FixtureImage, seed: u32) -> Result<(Stream, u32, u32)> {
    match figure {
        FixtureImage::Photo { width, height } => {
            let mut noise = Noise(seed.wrapping_add(97));
            let image = RgbImage::from_fn(width, height, |x, y| {
                Rgb([
                    ((x * 255) / width.max(1)) as u8 ^ (noise.next() & 0x1F),
                    ((y * 255) / height.max(1)) as u8,
                    noise.next(),
                ])
            });
            let bytes = encode_jpeg(DynamicImage::ImageRgb8(image))?;
            let stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(width),
                    "Height" => i64::from(height),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                bytes,
            );
            Ok((stream, width, height))
        }
        FixtureImage::Diagram { width, height } => {
            let image = RgbImage::from_fn(width, height, |x, y| {
                let border = x < 2 || y < 2 || x + 2 >= width || y + 2 >= height;
                let bar = x > width / 4 && x < width / 2 && y > height / 3;
                if border {
                    Rgb([0, 0, 0])
                } else if bar {
                    Rgb([30, 60, 200])
                } else {
                    Rgb([255, 255, 255])
                }
            });
            let stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(width),
                    "Height" => i64::from(height),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                image.into_raw(),
            );
            Ok((stream, width, height))
        }
    }
}

// -- Outline ------------------------------------------------------------------

fn destination(page_ids: &[ObjectId], page: usize) -> Option<Object> {
    let page_id = page_ids.get(page)?;
    Some(Object::Array(vec![
        Object::Reference(*page_id),
        "XYZ".into(),
        0.into(),
        PAGE_HEIGHT.into(),
        0.into(),
    ]))
}

/// Write a linked list of outline items under `parent`; returns (first, last, count).
fn write_siblings(
    document: &mut Document,
    parent: ObjectId,
    items: &[(String, usize, Vec<(String, usize)>)],
    page_ids: &[ObjectId],
) -> Option<(ObjectId, ObjectId, i64)> {
    let ids: Vec<ObjectId> = items.iter().map(|_| document.new_object_id()).collect();
    let mut count = 0;
    for (position, (title, page, children)) in items.iter().enumerate() {
        let mut item = dictionary! {
            "Title" => text_string(title),
            "Parent" => parent,
        };
        if let Some(dest) = destination(page_ids, *page) {
            item.set("Dest", dest);
        }
        if position > 0 {
            item.set("Prev", ids[position - 1]);
        }
        if let Some(next) = ids.get(position + 1) {
            item.set("Next", *next);
        }
        let nested: Vec<_> = children
            .iter()
            .map(|(title, page)| (title.clone(), *page, Vec::new()))
            .collect();
        if let Some((first, last, child_count)) = write_siblings(document, ids[position], &nested, page_ids) {
            item.set("First", first);
            item.set("Last", last);
            item.set("Count", child_count);
            count += child_count;
        }
        document.objects.insert(ids[position], Object::Dictionary(item));
        count += 1;
    }
    Some((*ids.first()?, *ids.last()?, count))
}

fn write_outline(document: &mut Document, outline: &[OutlineItem], page_ids: &[ObjectId]) -> Option<ObjectId> {
    if outline.is_empty() {
        return None;
    }
    let outlines_id = document.new_object_id();
    let items: Vec<_> = outline
        .iter()
        .map(|item| (item.title.clone(), item.page, item.children.clone()))
        .collect();
    let (first, last, count) = write_siblings(document, outlines_id, &items, page_ids)?;
    document.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => first,
            "Last" => last,
            "Count" => count,
        }),
    );
    Some(outlines_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_wrap_to_width() {
        let lines = paragraph_lines(3, LINE_CHARS);
        assert_eq!(lines.len(), LINES_PER_PARAGRAPH);
        assert!(lines.iter().all(|line| line.len() <= LINE_CHARS));
        assert!(lines[0].starts_with(char::is_uppercase));
    }

    #[test]
    fn non_ascii_text_uses_utf16() {
        match text_string("第一章") {
            Object::String(bytes, _) => assert_eq!(&bytes[..2], &[0xFE, 0xFF]),
            other => panic!("unexpected object {other:?}"),
        }
    }

    #[test]
    fn documents_load_back() {
        let bytes = FixtureDocument::new()
            .page(FixturePage::prose(Some("One"), 2))
            .page(FixturePage::scanned(1))
            .outline_entry("One", 0)
            .outline_child("One, part two", 0)
            .build();
        let document = Document::load_mem(&bytes).expect("fixture loads");
        assert_eq!(document.get_pages().len(), 2);
    }
}
