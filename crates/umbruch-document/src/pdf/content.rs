// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content-stream interpreter. Tracks the text and graphics state closely
// enough to place glyph runs and images in page space, then merges runs into
// text blocks.
//
// Glyph widths are not read from font programs; runs advance by an average
// glyph width, which is enough for block geometry.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object};
use tracing::{debug, trace};
use umbruch_core::{
    BlockId, BlockOrigin, BoundingBox, FontDescriptor, FontWeight, RawImage, TextBlock,
};

use super::objects::{decode_text_string, dict_get, name, number, resolve, resolve_dict};
use super::xobject::decode_image;

/// Average advance of one glyph, as a fraction of the font size.
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;
/// `TJ` adjustments below this (thousandths of an em) read as a word break.
const WORD_BREAK_ADJUSTMENT: f32 = -200.0;
/// Maximum nesting of form XObjects.
const MAX_FORM_DEPTH: usize = 4;

// -- Matrices -----------------------------------------------------------------

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f32> = operands.iter().filter_map(number).collect();
        match values.as_slice() {
            [a, b, c, d, e, f] => Some(Self {
                a: *a,
                b: *b,
                c: *c,
                d: *d,
                e: *e,
                f: *f,
            }),
            _ => None,
        }
    }

    /// `self × other`: apply `self`, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.a + y * self.c + self.e,
            x * self.b + y * self.d + self.f,
        )
    }

    fn horizontal_scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    fn vertical_scale(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

// -- Fonts --------------------------------------------------------------------

/// Strip a subset tag such as `ABCDEF+` from a base font name.
pub fn strip_subset_prefix(base_font: &str) -> &str {
    match base_font.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => base_font,
    }
}

/// Infer the weight from a font name.
pub fn weight_from_name(font_name: &str) -> FontWeight {
    let lower = font_name.to_ascii_lowercase();
    if ["bold", "black", "heavy", "semibold", "demi"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        FontWeight::Bold
    } else {
        FontWeight::Regular
    }
}

fn font_descriptor(document: &Document, resources: Option<&Dictionary>, key: &[u8]) -> FontDescriptor {
    let family = resources
        .and_then(|res| dict_get(document, res, b"Font"))
        .and_then(|fonts| resolve_dict(document, fonts))
        .and_then(|fonts| dict_get(document, fonts, key))
        .and_then(|font| resolve_dict(document, font))
        .and_then(|font| dict_get(document, font, b"BaseFont"))
        .and_then(name)
        .map(|base| strip_subset_prefix(&String::from_utf8_lossy(base)).to_string())
        .unwrap_or_else(|| String::from_utf8_lossy(key).into_owned());

    FontDescriptor {
        weight: weight_from_name(&family),
        family,
        size: 0.0,
    }
}

// -- Glyph runs and blocks ----------------------------------------------------

/// A piece of text drawn with a single show operator.
#[derive(Debug, Clone)]
struct GlyphRun {
    text: String,
    x: f32,
    /// Baseline in page space (top-left origin).
    baseline: f32,
    width: f32,
    size: f32,
}

#[derive(Debug)]
struct PendingBlock {
    font_key: Vec<u8>,
    font: FontDescriptor,
    text: String,
    bbox: BoundingBox,
    baseline: f32,
    line_end: f32,
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{30FF}' | '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{AC00}'..='\u{D7AF}' | '\u{3000}'..='\u{303F}' | '\u{FF00}'..='\u{FFEF}')
}

fn run_box(run: &GlyphRun) -> BoundingBox {
    BoundingBox::new(
        run.x,
        run.baseline - run.size,
        run.x + run.width,
        run.baseline + run.size * 0.25,
    )
}

impl PendingBlock {
    fn start(font_key: Vec<u8>, mut font: FontDescriptor, run: GlyphRun) -> Self {
        font.size = run.size;
        Self {
            font_key,
            font,
            bbox: run_box(&run),
            baseline: run.baseline,
            line_end: run.x + run.width,
            text: run.text,
        }
    }

    /// Whether `run` continues this block: same font and size, and either the
    /// same line or the next line within 1.5 font sizes.
    fn accepts(&self, font_key: &[u8], run: &GlyphRun) -> bool {
        let size = self.font.size.max(1.0);
        if font_key != self.font_key.as_slice() || (run.size - self.font.size).abs() > 0.5 {
            return false;
        }
        let dy = run.baseline - self.baseline;
        if dy.abs() <= size * 0.3 {
            let gap = run.x - self.line_end;
            return gap >= -size && gap <= size * 2.0;
        }
        dy > 0.0
            && dy <= size * 1.5
            && run.x >= self.bbox.x0 - size * 2.0
            && run.x <= self.bbox.x1
    }

    fn extend(&mut self, run: GlyphRun) {
        let size = self.font.size.max(1.0);
        let same_line = (run.baseline - self.baseline).abs() <= size * 0.3;
        let needs_separator = if same_line {
            run.x - self.line_end > size * 0.15
        } else {
            true
        };
        let joins_cjk = self.text.chars().last().is_some_and(is_cjk)
            || run.text.chars().next().is_some_and(is_cjk);
        let ends_with_space = self.text.ends_with(char::is_whitespace);
        if needs_separator && !joins_cjk && !ends_with_space && !run.text.starts_with(char::is_whitespace) {
            self.text.push(' ');
        }
        self.bbox = self.bbox.union(&run_box(&run));
        self.baseline = run.baseline;
        self.line_end = run.x + run.width;
        self.text.push_str(&run.text);
    }
}

// -- Interpreter --------------------------------------------------------------

#[derive(Debug, Clone)]
struct TextState {
    matrix: Matrix,
    line_matrix: Matrix,
    font_key: Vec<u8>,
    font: FontDescriptor,
    font_size: f32,
    leading: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            font_key: Vec::new(),
            font: FontDescriptor::default(),
            font_size: 12.0,
            leading: 0.0,
        }
    }
}

/// Text blocks and images found on one page.
#[derive(Debug, Default)]
pub struct PageContent {
    pub blocks: Vec<TextBlock>,
    pub images: Vec<RawImage>,
}

/// Walks a page's operators and collects text blocks and images.
pub struct ContentInterpreter<'a> {
    document: &'a Document,
    page: usize,
    page_height: f32,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    text: TextState,
    current: Option<PendingBlock>,
    blocks: Vec<TextBlock>,
    images: Vec<RawImage>,
}

impl<'a> ContentInterpreter<'a> {
    pub fn new(document: &'a Document, page: usize, page_height: f32) -> Self {
        Self {
            document,
            page,
            page_height,
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            text: TextState::default(),
            current: None,
            blocks: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Interpret decoded page content against the page's resources.
    pub fn run(mut self, content: &Content, resources: Option<&'a Dictionary>) -> PageContent {
        self.interpret(&content.operations, resources, 0);
        self.flush();
        debug!(
            page = self.page,
            blocks = self.blocks.len(),
            images = self.images.len(),
            "Content stream interpreted"
        );
        PageContent {
            blocks: self.blocks,
            images: self.images,
        }
    }

    fn interpret(&mut self, operations: &[Operation], resources: Option<&'a Dictionary>, depth: usize) {
        for operation in operations {
            let operands = operation.operands.as_slice();
            match operation.operator.as_str() {
                "q" => self.ctm_stack.push(self.ctm),
                "Q" => {
                    if let Some(saved) = self.ctm_stack.pop() {
                        self.ctm = saved;
                    }
                }
                "cm" => {
                    if let Some(matrix) = Matrix::from_operands(operands) {
                        self.ctm = matrix.then(&self.ctm);
                    }
                }
                "BT" => {
                    self.text.matrix = Matrix::IDENTITY;
                    self.text.line_matrix = Matrix::IDENTITY;
                }
                "ET" => {}
                "Tf" => {
                    if let [Object::Name(key), size] = operands {
                        self.text.font = font_descriptor(self.document, resources, key);
                        self.text.font_key = key.clone();
                        self.text.font_size = number(size).unwrap_or(self.text.font_size);
                    }
                }
                "TL" => {
                    if let Some(leading) = operands.first().and_then(number) {
                        self.text.leading = leading;
                    }
                }
                "Td" => self.move_text(operands, false),
                "TD" => self.move_text(operands, true),
                "Tm" => {
                    if let Some(matrix) = Matrix::from_operands(operands) {
                        self.text.matrix = matrix;
                        self.text.line_matrix = matrix;
                    }
                }
                "T*" => self.next_line(),
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show(&decode_text_string(bytes));
                    }
                }
                "'" => {
                    self.next_line();
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show(&decode_text_string(bytes));
                    }
                }
                "\"" => {
                    self.next_line();
                    if let Some(Object::String(bytes, _)) = operands.get(2) {
                        self.show(&decode_text_string(bytes));
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(parts)) = operands.first() {
                        self.show_adjusted(parts);
                    }
                }
                "Do" => {
                    if let Some(Object::Name(key)) = operands.first() {
                        self.draw_xobject(key, resources, depth);
                    }
                }
                other => trace!(operator = other, "Operator ignored"),
            }
        }
    }

    fn move_text(&mut self, operands: &[Object], set_leading: bool) {
        let values: Vec<f32> = operands.iter().filter_map(number).collect();
        if let [tx, ty] = values.as_slice() {
            if set_leading {
                self.text.leading = -ty;
            }
            self.text.line_matrix = Matrix::translation(*tx, *ty).then(&self.text.line_matrix);
            self.text.matrix = self.text.line_matrix;
        }
    }

    fn next_line(&mut self) {
        let leading = self.text.leading;
        self.text.line_matrix = Matrix::translation(0.0, -leading).then(&self.text.line_matrix);
        self.text.matrix = self.text.line_matrix;
    }

    fn advance(&mut self, text_space: f32) {
        self.text.matrix = Matrix::translation(text_space, 0.0).then(&self.text.matrix);
    }

    fn show_adjusted(&mut self, parts: &[Object]) {
        for part in parts {
            match part {
                Object::String(bytes, _) => self.show(&decode_text_string(bytes)),
                other => {
                    if let Some(adjustment) = number(other) {
                        if adjustment < WORD_BREAK_ADJUSTMENT
                            && let Some(block) = self.current.as_mut()
                            && !block.text.ends_with(' ')
                        {
                            block.text.push(' ');
                        }
                        self.advance(-adjustment / 1000.0 * self.text.font_size);
                    }
                }
            }
        }
    }

    fn show(&mut self, text: &str) {
        let glyphs = text.chars().count();
        if glyphs == 0 {
            return;
        }
        let rendering = self.text.matrix.then(&self.ctm);
        let (x, y) = rendering.apply(0.0, 0.0);
        let mut size = self.text.font_size.abs() * rendering.vertical_scale();
        if !size.is_finite() || size <= 0.0 {
            size = self.text.font_size.abs().max(1.0);
        }
        let advance = glyphs as f32 * self.text.font_size.abs() * AVERAGE_GLYPH_WIDTH;
        let width = advance * rendering.horizontal_scale();
        self.advance(advance);

        if text.trim().is_empty() {
            if let Some(block) = self.current.as_mut()
                && !block.text.ends_with(' ')
            {
                block.text.push(' ');
            }
            return;
        }

        let run = GlyphRun {
            text: text.to_string(),
            x,
            baseline: self.page_height - y,
            width,
            size,
        };
        let font_key = self.text.font_key.clone();
        match self.current.as_mut() {
            Some(block) if block.accepts(&font_key, &run) => block.extend(run),
            _ => {
                self.flush();
                self.current = Some(PendingBlock::start(font_key, self.text.font.clone(), run));
            }
        }
    }

    fn flush(&mut self) {
        let Some(block) = self.current.take() else {
            return;
        };
        let text = block.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return;
        }
        let seq = self.blocks.len();
        self.blocks.push(TextBlock {
            id: BlockId { page: self.page, seq },
            page: self.page,
            bbox: block.bbox,
            font: block.font,
            text,
            reading_order: seq,
            origin: BlockOrigin::Extracted,
            table_cell: None,
        });
    }

    fn draw_xobject(&mut self, key: &[u8], resources: Option<&'a Dictionary>, depth: usize) {
        let document = self.document;
        let Some(Object::Stream(stream)) = resources
            .and_then(|res| dict_get(document, res, b"XObject"))
            .and_then(|xobjects| resolve_dict(document, xobjects))
            .and_then(|xobjects| dict_get(document, xobjects, key))
        else {
            debug!(name = %String::from_utf8_lossy(key), "XObject not found");
            return;
        };

        match dict_get(document, &stream.dict, b"Subtype").and_then(name) {
            Some(b"Image") => {
                let Some(decoded) = decode_image(document, stream) else {
                    return;
                };
                let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
                    .map(|(x, y)| self.ctm.apply(x, y));
                let xs = corners.map(|(x, _)| x);
                let ys = corners.map(|(_, y)| self.page_height - y);
                let bbox = BoundingBox::new(
                    xs.iter().copied().fold(f32::INFINITY, f32::min),
                    ys.iter().copied().fold(f32::INFINITY, f32::min),
                    xs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                    ys.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                );
                let digest = decoded.digest();
                self.images.push(RawImage {
                    page: self.page,
                    bbox,
                    bytes: decoded.bytes,
                    encoding: decoded.encoding,
                    width: decoded.width,
                    height: decoded.height,
                    digest,
                });
            }
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                let Ok(form) = Content::decode(&data) else {
                    debug!("Form XObject content unreadable");
                    return;
                };
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|res| resolve_dict(document, res))
                    .or(resources);
                let saved = self.ctm;
                if let Some(matrix) = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|m| resolve(document, m))
                    .and_then(|m| match m {
                        Object::Array(values) => Matrix::from_operands(values),
                        _ => None,
                    })
                {
                    self.ctm = matrix.then(&self.ctm);
                }
                self.interpret(&form.operations, form_resources, depth + 1);
                self.ctm = saved;
            }
            _ => {}
        }
    }
}
