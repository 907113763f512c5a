// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition engine: render, preprocess, recognize, and turn recognized
// lines into text blocks.

use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info, instrument, warn};
use umbruch_core::{
    BlockId, BlockOrigin, BoundingBox, FontDescriptor, PageInfo, RecognitionResult,
    RecognizedLine, Result, TextBlock, UmbruchError,
};

use super::preprocess::PagePreprocessor;
use super::render::PageRenderer;
use super::script::{detect_script, is_cjk};
use crate::pdf::ExtractedPage;

/// Font family reported for blocks that came out of recognition.
pub const RECOGNIZED_FAMILY: &str = "recognized";

/// Recognized line heights are roughly this multiple of the font size.
const LINE_HEIGHT_FACTOR: f32 = 1.2;
/// A vertical gap larger than this share of the line height starts a new paragraph.
const PARAGRAPH_GAP_SHARE: f32 = 0.8;
/// Adjacent lines whose heights differ by more than this share are not one paragraph.
const HEIGHT_CHANGE_SHARE: f32 = 0.3;

/// Layout used for lines the recognizer reports without a position.
const SYNTHETIC_MARGIN: f32 = 72.0;
const SYNTHETIC_LINE_HEIGHT: f32 = 14.0;

/// Recognizes text in a page raster.
///
/// Implementations return lines in reading order. Line boxes are in the
/// raster's pixel space; the engine maps them back to page points.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the recognizer can run (models present, binary installed).
    fn is_available(&self) -> bool {
        true
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognizedLine>>;
}

/// Placeholder used when no recognizer is installed. Scanned pages are then
/// skipped with a warning instead of recognized.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecognizer;

impl TextRecognizer for NoRecognizer {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<Vec<RecognizedLine>> {
        Err(UmbruchError::Recognition("no text recognizer is installed".into()))
    }
}

/// Recognition output for one page plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecognition {
    pub result: RecognitionResult,
    /// Digest of the embedded raster that was recognized.
    pub source_digest: Option<String>,
    /// Skew correction applied before recognition, in degrees.
    pub skew_correction: f32,
}

/// Drives a renderer and a recognizer over scanned pages.
#[derive(Clone)]
pub struct RecognitionEngine {
    renderer: Arc<dyn PageRenderer>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl std::fmt::Debug for RecognitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionEngine")
            .field("recognizer", &self.recognizer.name())
            .finish_non_exhaustive()
    }
}

impl RecognitionEngine {
    pub fn new(renderer: Arc<dyn PageRenderer>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            renderer,
            recognizer,
        }
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    pub fn is_available(&self) -> bool {
        self.recognizer.is_available()
    }

    /// Recognize one page at `dpi`.
    ///
    /// `Ok(None)` when the page has nothing to render. Line boxes in the
    /// result are in page points.
    #[instrument(skip(self, page), fields(page = page.info.index, recognizer = self.recognizer.name()))]
    pub fn recognize_page(&self, page: &ExtractedPage, dpi: u32) -> Result<Option<PageRecognition>> {
        let Some(rendered) = self.renderer.render(page, dpi)? else {
            return Ok(None);
        };

        let prepared = PagePreprocessor::new(&rendered.image).prepare();
        let skew_correction = prepared.skew_correction();
        let lines: Vec<RecognizedLine> = self
            .recognizer
            .recognize(&prepared.into_dynamic())?
            .into_iter()
            .map(|line| RecognizedLine {
                bbox: line.bbox.map(|pixels| rendered.to_page_space(&pixels)),
                ..line
            })
            .collect();

        let result = RecognitionResult {
            page: page.info.index,
            confidence: weighted_confidence(&lines),
            script: detect_script(
                &lines
                    .iter()
                    .map(|line| line.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            lines,
        };
        if result.is_empty() {
            warn!(page = page.info.index, "Recognition produced no text");
        }
        info!(
            page = page.info.index,
            lines = result.lines.len(),
            confidence = result.confidence,
            script = ?result.script,
            "Page recognized"
        );
        Ok(Some(PageRecognition {
            result,
            source_digest: rendered.source_digest,
            skew_correction,
        }))
    }
}

/// Character-weighted mean of line confidences. Zero when there is no text.
pub fn weighted_confidence(lines: &[RecognizedLine]) -> f32 {
    let (weighted, chars) = lines.iter().fold((0.0f32, 0usize), |(weighted, chars), line| {
        let count = line.text.chars().filter(|c| !c.is_whitespace()).count();
        (weighted + line.confidence * count as f32, chars + count)
    });
    if chars == 0 {
        0.0
    } else {
        weighted / chars as f32
    }
}

// -- Block construction -------------------------------------------------------

/// Group recognized lines into paragraph blocks for `page`.
///
/// Block sequence numbers start at `first_seq` so they follow the page's
/// extracted blocks. Reading order follows line order.
pub fn recognized_blocks(result: &RecognitionResult, page: &PageInfo, first_seq: usize) -> Vec<TextBlock> {
    let placed: Vec<(&str, BoundingBox)> = result
        .lines
        .iter()
        .enumerate()
        .map(|(position, line)| {
            let bbox = line.bbox.unwrap_or_else(|| synthetic_line_box(page, position));
            (line.text.trim(), bbox)
        })
        .collect();

    let mut paragraphs: Vec<Vec<(&str, BoundingBox)>> = Vec::new();
    let mut current: Vec<(&str, BoundingBox)> = Vec::new();
    for (text, bbox) in placed {
        if text.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((_, previous)) = current.last()
            && starts_paragraph(previous, &bbox)
        {
            paragraphs.push(std::mem::take(&mut current));
        }
        current.push((text, bbox));
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    let blocks: Vec<TextBlock> = paragraphs
        .into_iter()
        .enumerate()
        .map(|(offset, lines)| {
            let bbox = lines
                .iter()
                .skip(1)
                .fold(lines[0].1, |acc, (_, bbox)| acc.union(bbox));
            let mean_height = lines.iter().map(|(_, b)| b.height()).sum::<f32>() / lines.len() as f32;
            TextBlock {
                id: BlockId {
                    page: page.index,
                    seq: first_seq + offset,
                },
                page: page.index,
                bbox,
                font: FontDescriptor {
                    family: RECOGNIZED_FAMILY.to_string(),
                    size: (mean_height / LINE_HEIGHT_FACTOR).max(1.0),
                    weight: Default::default(),
                },
                text: join_lines(lines.iter().map(|(text, _)| *text)),
                reading_order: first_seq + offset,
                origin: BlockOrigin::Recognized,
                table_cell: None,
            }
        })
        .collect();
    debug!(page = page.index, blocks = blocks.len(), "Recognized lines grouped");
    blocks
}

fn synthetic_line_box(page: &PageInfo, position: usize) -> BoundingBox {
    let top = SYNTHETIC_MARGIN + position as f32 * SYNTHETIC_LINE_HEIGHT;
    BoundingBox::new(
        SYNTHETIC_MARGIN,
        top,
        (page.width - SYNTHETIC_MARGIN).max(SYNTHETIC_MARGIN + 1.0),
        top + SYNTHETIC_LINE_HEIGHT - 2.0,
    )
}

fn starts_paragraph(previous: &BoundingBox, next: &BoundingBox) -> bool {
    let height = previous.height().max(1.0);
    let gap = next.y0 - previous.y1;
    let height_change = (next.height() - previous.height()).abs() / height;
    gap > height * PARAGRAPH_GAP_SHARE || gap < -height || height_change > HEIGHT_CHANGE_SHARE
}

/// Join lines with spaces. CJK text joins without a separator, and a
/// trailing hyphen before a lowercase continuation is dropped.
pub fn join_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    let mut joined = String::new();
    for line in lines {
        let Some(first) = line.chars().next() else {
            continue;
        };
        match joined.chars().last() {
            None => {}
            Some('-') if first.is_lowercase() => {
                joined.pop();
            }
            Some(last) if is_cjk(last) || is_cjk(first) => {}
            Some(_) => joined.push(' '),
        }
        joined.push_str(line);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureDocument, FixturePage};
    use crate::pdf::PdfReader;
    use crate::recognition::EmbeddedImageRenderer;
    use umbruch_core::Script;

    /// Returns canned lines with pixel boxes derived from the raster size.
    struct CannedRecognizer {
        lines: Vec<(&'static str, f32)>,
    }

    impl TextRecognizer for CannedRecognizer {
        fn name(&self) -> &str {
            "canned"
        }

        fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognizedLine>> {
            let line_height = image.height() as f32 / 40.0;
            Ok(self
                .lines
                .iter()
                .enumerate()
                .map(|(row, (text, confidence))| {
                    let top = line_height * 4.0 + row as f32 * line_height * 1.2;
                    RecognizedLine {
                        text: text.to_string(),
                        confidence: *confidence,
                        bbox: Some(BoundingBox::new(
                            image.width() as f32 * 0.1,
                            top,
                            image.width() as f32 * 0.9,
                            top + line_height,
                        )),
                    }
                })
                .collect())
        }
    }

    struct FailingRecognizer;

    impl TextRecognizer for FailingRecognizer {
        fn name(&self) -> &str {
            "failing"
        }

        fn recognize(&self, _image: &DynamicImage) -> Result<Vec<RecognizedLine>> {
            Err(UmbruchError::Recognition("model crashed".into()))
        }
    }

    fn scanned_page() -> ExtractedPage {
        let bytes = FixtureDocument::new().page(FixturePage::scanned(3)).build();
        let reader = PdfReader::from_bytes(&bytes).expect("fixture parses");
        reader.extract_page(0, 0.006).expect("page extracts")
    }

    fn engine(recognizer: impl TextRecognizer + 'static) -> RecognitionEngine {
        RecognitionEngine::new(Arc::new(EmbeddedImageRenderer), Arc::new(recognizer))
    }

    fn line(text: &str, confidence: f32, bbox: Option<BoundingBox>) -> RecognizedLine {
        RecognizedLine {
            text: text.to_string(),
            confidence,
            bbox,
        }
    }

    #[test]
    fn scanned_page_is_recognized_in_page_space() {
        let recognizer = CannedRecognizer {
            lines: vec![("Chapter One", 95.0), ("It was a dark night.", 85.0)],
        };
        let page = scanned_page();
        let recognition = engine(recognizer)
            .recognize_page(&page, 150)
            .expect("recognition runs")
            .expect("page has a raster");

        let result = &recognition.result;
        assert_eq!(result.page, 0);
        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.script, Script::Latin);
        assert!(recognition.source_digest.is_some());
        // Boxes land inside the page, not in raster pixels.
        let bbox = result.lines[0].bbox.expect("line box");
        assert!(bbox.x1 <= page.info.width + 1.0 && bbox.y1 <= page.info.height + 1.0);
        // (10 * 95 + 16 * 85) / 26
        assert!((result.confidence - 88.85).abs() < 0.1, "got {}", result.confidence);
    }

    #[test]
    fn text_pages_without_rasters_are_skipped() {
        let bytes = FixtureDocument::new().page(FixturePage::prose(None, 2)).build();
        let reader = PdfReader::from_bytes(&bytes).expect("fixture parses");
        let page = reader.extract_page(0, 0.006).expect("page extracts");
        let recognizer = CannedRecognizer { lines: vec![] };
        assert!(engine(recognizer).recognize_page(&page, 150).expect("runs").is_none());
    }

    #[test]
    fn recognizer_errors_propagate() {
        let err = engine(FailingRecognizer)
            .recognize_page(&scanned_page(), 150)
            .expect_err("recognizer fails");
        assert!(matches!(err, UmbruchError::Recognition(_)));
    }

    #[test]
    fn confidence_ignores_empty_lines() {
        let lines = vec![line("", 10.0, None), line("abcd", 90.0, None)];
        assert_eq!(weighted_confidence(&lines), 90.0);
        assert_eq!(weighted_confidence(&[]), 0.0);
    }

    #[test]
    fn lines_group_into_paragraphs_by_gap() {
        let result = RecognitionResult {
            page: 2,
            lines: vec![
                line("First paragraph starts", 90.0, Some(BoundingBox::new(72.0, 100.0, 500.0, 112.0))),
                line("and continues here.", 90.0, Some(BoundingBox::new(72.0, 114.0, 400.0, 126.0))),
                line("Second paragraph.", 90.0, Some(BoundingBox::new(72.0, 160.0, 300.0, 172.0))),
            ],
            confidence: 90.0,
            script: Script::Latin,
        };
        let page = ExtractedPage::empty(2, 595.0, 842.0).info;
        let blocks = recognized_blocks(&result, &page, 3);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "First paragraph starts and continues here.");
        assert_eq!(blocks[0].id, BlockId { page: 2, seq: 3 });
        assert_eq!(blocks[1].reading_order, 4);
        assert_eq!(blocks[1].origin, BlockOrigin::Recognized);
        assert!((blocks[0].font.size - 10.0).abs() < 0.01);
    }

    #[test]
    fn lines_without_boxes_are_stacked() {
        let result = RecognitionResult {
            page: 0,
            lines: vec![line("one", 80.0, None), line("", 0.0, None), line("two", 80.0, None)],
            confidence: 80.0,
            script: Script::Latin,
        };
        let page = ExtractedPage::empty(0, 595.0, 842.0).info;
        let blocks = recognized_blocks(&result, &page, 0);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].bbox.y0 < blocks[1].bbox.y0);
    }

    #[test]
    fn joining_respects_script_and_hyphens() {
        assert_eq!(join_lines(["hello", "world"]), "hello world");
        assert_eq!(join_lines(["recog-", "nition"]), "recognition");
        assert_eq!(join_lines(["天地玄黄", "宇宙洪荒"]), "天地玄黄宇宙洪荒");
        assert_eq!(join_lines(["Pre-", "Raphaelite"]), "Pre- Raphaelite");
    }
}
