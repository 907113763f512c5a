// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local boundary detection methods: outline, typography, and page patterns.

use tracing::debug;
use umbruch_core::{ChapterBoundary, DetectionMethod, OutlineEntry, TextBlock};

use super::headings::{clean_title, is_heading_like, is_numbered_heading, numbering_depth};
use crate::pdf::ExtractedPage;

// -- Outline ------------------------------------------------------------------

const OUTLINE_CONFIDENCE: f32 = 0.95;
const OUTLINE_PENALTY: f32 = 0.05;
const OUTLINE_SHORT_TITLE: usize = 5;

/// One boundary per usable outline entry.
pub fn outline_candidates(outline: &[OutlineEntry], pages: &[ExtractedPage]) -> Vec<ChapterBoundary> {
    let candidates: Vec<ChapterBoundary> = outline
        .iter()
        .filter_map(|entry| {
            let title = clean_title(&entry.title);
            let chars = title.chars().count();
            if chars < 2 || title.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let Some(page) = pages.get(entry.page) else {
                debug!(page = entry.page, title = %title, "Outline entry points past the last page");
                return None;
            };
            let mut confidence = OUTLINE_CONFIDENCE;
            if chars < OUTLINE_SHORT_TITLE {
                confidence -= OUTLINE_PENALTY;
            }
            if entry.level > 2 {
                confidence -= OUTLINE_PENALTY;
            }
            Some(ChapterBoundary {
                page: entry.page,
                offset: locate_heading(&page.blocks, &title, entry.top),
                title: Some(title),
                confidence,
                method: DetectionMethod::Outline,
                level: entry.level.max(1),
            })
        })
        .collect();
    debug!(candidates = candidates.len(), "Outline method finished");
    candidates
}

/// Reading-order index where a heading titled `title` starts on a page.
///
/// Prefers a block whose text starts with the title, then the first block
/// below `top`, then the top of the page.
pub fn locate_heading(blocks: &[TextBlock], title: &str, top: Option<f32>) -> usize {
    let wanted = title.to_lowercase();
    let by_text = blocks.iter().find(|block| {
        let text = clean_title(&block.text).to_lowercase();
        !text.is_empty() && (text.starts_with(&wanted) || wanted.starts_with(&text))
    });
    let by_position = || top.and_then(|top| blocks.iter().find(|block| block.bbox.y1 > top + 1.0));
    by_text
        .or_else(by_position)
        .map(|block| block.reading_order)
        .unwrap_or(0)
}

// -- Typography ---------------------------------------------------------------

const SIZE_RATIO: f32 = 1.3;
const BOLD_SIZE_RATIO: f32 = 1.15;
const RATIO_CEILING: f32 = 2.2;
const TYPOGRAPHY_FLOOR: f32 = 0.55;
const TYPOGRAPHY_SPAN: f32 = 0.30;
const BOLD_BONUS: f32 = 0.05;
/// Sizes closer than this are the same heading level.
const SIZE_BUCKET: f32 = 0.5;

/// Document-wide body size: the character-weighted median font size.
pub fn body_font_size(pages: &[ExtractedPage]) -> Option<f32> {
    let mut sizes: Vec<(f32, usize)> = pages
        .iter()
        .flat_map(|page| &page.blocks)
        .filter(|block| block.table_cell.is_none() && block.font.size > 0.0)
        .map(|block| (block.font.size, block.char_count()))
        .filter(|(_, chars)| *chars > 0)
        .collect();
    if sizes.is_empty() {
        return None;
    }
    sizes.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: usize = sizes.iter().map(|(_, chars)| chars).sum();
    let mut seen = 0;
    for (size, chars) in &sizes {
        seen += chars;
        if seen * 2 >= total {
            return Some(*size);
        }
    }
    sizes.last().map(|(size, _)| *size)
}

fn typography_confidence(ratio: f32, bold: bool) -> f32 {
    let scaled = ((ratio - SIZE_RATIO) / (RATIO_CEILING - SIZE_RATIO)).clamp(0.0, 1.0);
    let bonus = if bold { BOLD_BONUS } else { 0.0 };
    TYPOGRAPHY_FLOOR + TYPOGRAPHY_SPAN * scaled + bonus
}

/// Blocks set noticeably larger (or bold and somewhat larger) than body text.
///
/// Adjacent heading blocks of the same size on one page are one heading
/// broken over several lines.
pub fn typography_candidates(pages: &[ExtractedPage]) -> Vec<ChapterBoundary> {
    let Some(body) = body_font_size(pages) else {
        return Vec::new();
    };

    let mut candidates: Vec<(ChapterBoundary, f32, usize)> = Vec::new();
    for page in pages {
        for block in &page.blocks {
            if block.table_cell.is_some() {
                continue;
            }
            let ratio = block.font.size / body;
            let bold = block.font.is_bold();
            if !(ratio >= SIZE_RATIO || (bold && ratio >= BOLD_SIZE_RATIO)) {
                continue;
            }
            let title = clean_title(&block.text);
            if let Some((previous, size, order)) = candidates.last_mut()
                && previous.page == block.page
                && *order + 1 == block.reading_order
                && (*size - block.font.size).abs() < SIZE_BUCKET
            {
                if let Some(joined) = previous.title.as_mut() {
                    joined.push(' ');
                    joined.push_str(&title);
                }
                *order = block.reading_order;
                continue;
            }
            if !is_heading_like(&title) {
                continue;
            }
            candidates.push((
                ChapterBoundary {
                    page: block.page,
                    offset: block.reading_order,
                    title: Some(title),
                    confidence: typography_confidence(ratio, bold),
                    method: DetectionMethod::Typography,
                    level: 1,
                },
                block.font.size,
                block.reading_order,
            ));
        }
    }

    // Largest distinct heading size is level 1.
    let mut buckets: Vec<f32> = Vec::new();
    for (_, size, _) in &candidates {
        if !buckets.iter().any(|bucket| (bucket - size).abs() < SIZE_BUCKET) {
            buckets.push(*size);
        }
    }
    buckets.sort_by(|a, b| b.total_cmp(a));

    let candidates: Vec<ChapterBoundary> = candidates
        .into_iter()
        .map(|(mut boundary, size, _)| {
            let rank = buckets
                .iter()
                .position(|bucket| (bucket - size).abs() < SIZE_BUCKET)
                .unwrap_or(0);
            boundary.level = (rank + 1).min(u8::MAX as usize) as u8;
            boundary
        })
        .collect();
    debug!(body_size = body, candidates = candidates.len(), "Typography method finished");
    candidates
}

// -- Page patterns ------------------------------------------------------------

const PATTERN_CONFIDENCE: f32 = 0.5;
/// A chapter-opening heading starts in the top third of its page.
const TOP_SHARE: f32 = 1.0 / 3.0;
/// Share of the previous page that must be blank below its last block.
const TRAILING_BLANK_SHARE: f32 = 0.4;

/// Blank share of a page below its lowest block; empty pages are fully blank.
fn trailing_blank(page: &ExtractedPage) -> f32 {
    let height = page.info.height;
    if height <= 0.0 {
        return 1.0;
    }
    let bottom = page
        .blocks
        .iter()
        .map(|block| block.bbox.y1)
        .fold(0.0f32, f32::max);
    ((height - bottom) / height).clamp(0.0, 1.0)
}

fn pattern_boundary(block: &TextBlock, title: String) -> ChapterBoundary {
    ChapterBoundary {
        page: block.page,
        offset: block.reading_order,
        level: numbering_depth(&title).unwrap_or(1),
        title: Some(title),
        confidence: PATTERN_CONFIDENCE,
        method: DetectionMethod::Pattern,
    }
}

/// Pages that open with a heading after a page that ran out early, plus
/// numbered headings anywhere.
pub fn pattern_candidates(pages: &[ExtractedPage]) -> Vec<ChapterBoundary> {
    let mut candidates = Vec::new();
    for (position, page) in pages.iter().enumerate() {
        let follows_break = position == 0 || trailing_blank(&pages[position - 1]) >= TRAILING_BLANK_SHARE;
        let opening = page
            .blocks
            .iter()
            .filter(|block| block.table_cell.is_none())
            .min_by_key(|block| block.reading_order);

        let mut opening_order = None;
        if let Some(first) = opening
            && follows_break
            && first.bbox.y0 < page.info.height * TOP_SHARE
        {
            let title = clean_title(&first.text);
            if is_heading_like(&title) {
                opening_order = Some(first.reading_order);
                candidates.push(pattern_boundary(first, title));
            }
        }

        for block in &page.blocks {
            if block.table_cell.is_some() || Some(block.reading_order) == opening_order {
                continue;
            }
            let title = clean_title(&block.text);
            if is_numbered_heading(&title) && is_heading_like(&title) {
                candidates.push(pattern_boundary(block, title));
            }
        }
    }
    debug!(candidates = candidates.len(), "Pattern method finished");
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbruch_core::{BlockId, BlockOrigin, BoundingBox, FontDescriptor, FontWeight};

    fn block(page: usize, order: usize, y0: f32, size: f32, bold: bool, text: &str) -> TextBlock {
        TextBlock {
            id: BlockId { page, seq: order },
            page,
            bbox: BoundingBox::new(72.0, y0, 520.0, y0 + size * 1.4),
            font: FontDescriptor {
                family: "Times".into(),
                size,
                weight: if bold { FontWeight::Bold } else { FontWeight::Regular },
            },
            text: text.to_string(),
            reading_order: order,
            origin: BlockOrigin::Extracted,
            table_cell: None,
        }
    }

    fn body(page: usize, order: usize, y0: f32) -> TextBlock {
        let mut block = block(page, order, y0, 11.0, false, &"word ".repeat(80));
        block.bbox.y1 = y0 + 70.0;
        block
    }

    fn page(index: usize, blocks: Vec<TextBlock>) -> ExtractedPage {
        let mut page = ExtractedPage::empty(index, 595.0, 842.0);
        page.info.char_count = blocks.iter().map(TextBlock::char_count).sum();
        page.blocks = blocks;
        page
    }

    fn outline(title: &str, page: usize, level: u8) -> OutlineEntry {
        OutlineEntry {
            title: title.to_string(),
            level,
            page,
            top: None,
        }
    }

    #[test]
    fn outline_entries_become_candidates() {
        let pages = vec![
            page(0, vec![body(0, 0, 72.0)]),
            page(1, vec![body(1, 0, 72.0), block(1, 1, 200.0, 20.0, true, "The Second Part"), body(1, 2, 240.0)]),
        ];
        let candidates = outline_candidates(
            &[
                outline("Introduction", 0, 1),
                outline("The Second Part", 1, 1),
                outline("7", 1, 1),
                outline("Ab", 1, 3),
                outline("Missing", 9, 1),
            ],
            &pages,
        );
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].confidence, 0.95);
        assert_eq!(candidates[1].offset, 1);
        // Short and deep.
        assert!((candidates[2].confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn body_size_is_character_weighted() {
        let pages = vec![page(
            0,
            vec![
                block(0, 0, 72.0, 24.0, true, "Title"),
                block(0, 1, 72.0, 18.0, true, "Sub"),
                body(0, 2, 120.0),
            ],
        )];
        assert_eq!(body_font_size(&pages), Some(11.0));
    }

    #[test]
    fn typography_finds_and_ranks_headings() {
        let pages = vec![
            page(0, vec![block(0, 0, 72.0, 22.0, true, "Chapter 1"), body(0, 1, 120.0), body(0, 2, 300.0)]),
            page(1, vec![block(1, 0, 72.0, 15.0, true, "A Smaller Section"), body(1, 1, 120.0)]),
            page(2, vec![body(2, 0, 72.0), block(2, 1, 300.0, 22.0, true, "Chapter 2")]),
        ];
        let candidates = typography_candidates(&pages);
        let titles: Vec<_> = candidates.iter().map(|c| c.title.as_deref().unwrap_or("")).collect();
        assert_eq!(titles, vec!["Chapter 1", "A Smaller Section", "Chapter 2"]);
        let levels: Vec<u8> = candidates.iter().map(|c| c.level).collect();
        assert_eq!(levels, vec![1, 2, 1]);
        // 22 / 11 = 2.0: 0.55 + 0.30 * 0.7 / 0.9 + 0.05
        assert!((candidates[0].confidence - 0.8333).abs() < 0.01);
        assert!(candidates[1].confidence < candidates[0].confidence);
    }

    #[test]
    fn multi_line_headings_are_joined() {
        let pages = vec![page(
            0,
            vec![
                block(0, 0, 72.0, 22.0, false, "The Very Long"),
                block(0, 1, 102.0, 22.0, false, "Title of This Book"),
                body(0, 2, 160.0),
                body(0, 3, 260.0),
            ],
        )];
        let candidates = typography_candidates(&pages);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title.as_deref(), Some("The Very Long Title of This Book"));
    }

    #[test]
    fn large_sentences_are_not_headings() {
        let pages = vec![page(
            0,
            vec![block(0, 0, 72.0, 22.0, false, "This pull quote is set large."), body(0, 1, 120.0)],
        )];
        assert!(typography_candidates(&pages).is_empty());
    }

    #[test]
    fn pattern_needs_a_page_break_before_the_heading() {
        let full = |index| page(index, vec![body(index, 0, 72.0), body(index, 1, 700.0)]);
        let pages = vec![
            page(0, vec![block(0, 0, 80.0, 11.0, false, "Prologue"), body(0, 1, 120.0)]),
            // Ends at 190 of 842: more than 40% blank.
            page(1, vec![body(1, 0, 72.0), body(1, 1, 120.0)]),
            page(2, vec![block(2, 0, 80.0, 11.0, false, "Interlude"), body(2, 1, 120.0)]),
            full(3),
            page(4, vec![block(4, 0, 80.0, 11.0, false, "Not After A Break"), body(4, 1, 120.0)]),
        ];
        let candidates = pattern_candidates(&pages);
        let found: Vec<usize> = candidates.iter().map(|c| c.page).collect();
        assert_eq!(found, vec![0, 2]);
        assert!(candidates.iter().all(|c| c.confidence == 0.5));
    }

    #[test]
    fn numbered_headings_qualify_anywhere() {
        let pages = vec![
            page(0, vec![body(0, 0, 72.0), body(0, 1, 700.0)]),
            page(1, vec![body(1, 0, 72.0), block(1, 1, 400.0, 11.0, false, "2.3 Sampling"), body(1, 2, 430.0)]),
        ];
        let candidates = pattern_candidates(&pages);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].offset, 1);
        assert_eq!(candidates[0].level, 2);
    }
}
