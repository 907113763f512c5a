// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// XHTML markup for chapter documents.

use std::fmt::Write as _;

use umbruch_core::{ImageAsset, TableCell, TextBlock};

/// Escape the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// One item of a chapter body, in output order.
#[derive(Debug, Clone, Copy)]
pub enum BodyItem<'a> {
    Paragraph(&'a TextBlock),
    Image(&'a ImageAsset),
}

/// Streams the body of one chapter into XHTML.
///
/// Consecutive table-cell blocks of the same table are collected and
/// flushed as a single `<table>`.
#[derive(Debug, Default)]
pub struct ChapterWriter {
    body: String,
    table: Option<(usize, usize, Vec<(TableCell, String)>)>,
}

impl ChapterWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: BodyItem<'_>, image_href: impl Fn(&ImageAsset) -> String) {
        match item {
            BodyItem::Paragraph(block) => match block.table_cell {
                Some(cell) => self.push_cell(block.page, cell, &block.text),
                None => {
                    self.flush_table();
                    let text = collapse(&block.text);
                    if !text.is_empty() {
                        let _ = writeln!(self.body, "<p>{}</p>", escape_xml(&text));
                    }
                }
            },
            BodyItem::Image(image) => {
                self.flush_table();
                let alt = image.alt_text.as_deref().unwrap_or("");
                let _ = writeln!(
                    self.body,
                    "<figure><img src=\"{}\" alt=\"{}\" width=\"{}\" height=\"{}\"/></figure>",
                    escape_xml(&image_href(image)),
                    escape_xml(alt),
                    image.width,
                    image.height
                );
            }
        }
    }

    fn push_cell(&mut self, page: usize, cell: TableCell, text: &str) {
        match &mut self.table {
            Some((table_page, table, cells)) if *table_page == page && *table == cell.table => {
                cells.push((cell, collapse(text)));
            }
            _ => {
                self.flush_table();
                self.table = Some((page, cell.table, vec![(cell, collapse(text))]));
            }
        }
    }

    fn flush_table(&mut self) {
        let Some((_, _, mut cells)) = self.table.take() else {
            return;
        };
        cells.sort_by_key(|(cell, _)| (cell.row, cell.column));
        let columns = cells.iter().map(|(cell, _)| cell.column + 1).max().unwrap_or(0);

        self.body.push_str("<table>\n");
        let mut cursor = cells.iter().peekable();
        while let Some((first, _)) = cursor.peek() {
            let row = first.row;
            let mut row_cells = vec![String::new(); columns];
            while let Some((cell, text)) = cursor.next_if(|(cell, _)| cell.row == row) {
                let slot = &mut row_cells[cell.column];
                if !slot.is_empty() {
                    slot.push(' ');
                }
                slot.push_str(text);
            }
            self.body.push_str("<tr>");
            for text in row_cells {
                let _ = write!(self.body, "<td>{}</td>", escape_xml(&text));
            }
            self.body.push_str("</tr>\n");
        }
        self.body.push_str("</table>\n");
    }

    pub fn finish(mut self) -> String {
        self.flush_table();
        self.body
    }
}

/// Wrap a chapter body in a complete XHTML document.
pub fn chapter_document(
    title: &str,
    level: u8,
    language: &str,
    stylesheet_href: &str,
    body: &str,
) -> String {
    let level = level.clamp(1, 6);
    let title = escape_xml(title);
    let language = escape_xml(language);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{language}" lang="{language}">
<head>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="{stylesheet}"/>
</head>
<body>
<section epub:type="chapter">
<h{level} class="chapter-title">{title}</h{level}>
<div class="chapter-content">
{body}</div>
</section>
</body>
</html>
"#,
        stylesheet = escape_xml(stylesheet_href),
    )
}

/// Collapse whitespace runs, joining the lines of a block.
pub fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbruch_core::{
        BlockId, BlockOrigin, BoundingBox, FontDescriptor, ImageEncoding, ImageKind,
    };

    fn block(seq: usize, text: &str, cell: Option<(usize, usize)>) -> TextBlock {
        TextBlock {
            id: BlockId { page: 0, seq },
            page: 0,
            bbox: BoundingBox::new(72.0, 72.0 + seq as f32 * 20.0, 500.0, 88.0 + seq as f32 * 20.0),
            font: FontDescriptor::default(),
            text: text.to_string(),
            reading_order: seq,
            origin: BlockOrigin::Extracted,
            table_cell: cell.map(|(row, column)| TableCell { table: 0, row, column }),
        }
    }

    #[test]
    fn escapes_all_special_characters() {
        assert_eq!(
            escape_xml(r#"Tom & "Jerry" <it's>"#),
            "Tom &amp; &quot;Jerry&quot; &lt;it&apos;s&gt;"
        );
    }

    #[test]
    fn paragraphs_collapse_line_breaks() {
        let mut writer = ChapterWriter::new();
        writer.push(BodyItem::Paragraph(&block(0, "first line\n  second", None)), |_| String::new());
        writer.push(BodyItem::Paragraph(&block(1, "   ", None)), |_| String::new());
        assert_eq!(writer.finish(), "<p>first line second</p>\n");
    }

    #[test]
    fn table_cells_become_one_table() {
        let blocks = [
            block(0, "Name", Some((0, 0))),
            block(1, "Age", Some((0, 1))),
            block(2, "Ada", Some((1, 0))),
            block(3, "36", Some((1, 1))),
            block(4, "After the table.", None),
        ];
        let mut writer = ChapterWriter::new();
        for b in &blocks {
            writer.push(BodyItem::Paragraph(b), |_| String::new());
        }
        let body = writer.finish();
        assert_eq!(body.matches("<table>").count(), 1);
        assert!(body.contains("<tr><td>Name</td><td>Age</td></tr>"));
        assert!(body.contains("<tr><td>Ada</td><td>36</td></tr>"));
        assert!(body.find("</table>") < body.find("<p>After the table.</p>"));
    }

    #[test]
    fn images_carry_alt_text() {
        let image = ImageAsset {
            id: "img-0123456789abcdef".into(),
            page: 0,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            bytes: Vec::new(),
            encoding: ImageEncoding::Png,
            kind: ImageKind::Diagram,
            width: 10,
            height: 10,
            associated_block: None,
            alt_text: Some("Figure <1>".into()),
        };
        let mut writer = ChapterWriter::new();
        writer.push(BodyItem::Image(&image), |image| format!("../images/{}.png", image.id));
        let body = writer.finish();
        assert!(body.contains(r#"src="../images/img-0123456789abcdef.png""#));
        assert!(body.contains(r#"alt="Figure &lt;1&gt;""#));
    }

    #[test]
    fn document_uses_clamped_heading_level() {
        let doc = chapter_document("A & B", 9, "en", "../styles/book.css", "<p>x</p>\n");
        assert!(doc.contains(r#"<h6 class="chapter-title">A &amp; B</h6>"#));
        assert!(doc.contains(r#"<div class="chapter-content">"#));
        assert!(doc.contains(r#"xml:lang="en""#));
    }
}
