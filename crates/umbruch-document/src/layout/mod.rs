// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Layout module: column bands, table candidates, and reading order.
//
// Analysis never drops content: it reorders a page's blocks, assigns their
// reading-order index, and tags table cells.

pub mod columns;
pub mod tables;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use umbruch_core::config::LayoutConfig;
use umbruch_core::{BoundingBox, TableCell, TextBlock};

pub use columns::ColumnBand;
pub use tables::TableRegion;

use columns::split_columns;
use tables::{DetectedTable, detect_tables, group_lines};

/// Layout facts for one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub page: usize,
    /// Column bands, left to right. Empty for pages without text.
    pub columns: Vec<ColumnBand>,
    pub tables: Vec<TableRegion>,
}

impl PageLayout {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_multi_column(&self) -> bool {
        self.columns.len() >= 2
    }
}

/// Something placed as a unit in reading order above a column section.
enum Anchor {
    Block(usize),
    Table(usize),
}

/// Derives column structure, reading order, and table regions.
#[derive(Debug, Clone, Default)]
pub struct LayoutAnalyzer {
    config: LayoutConfig,
}

impl LayoutAnalyzer {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Analyse one page's blocks and put them in reading order.
    ///
    /// Bands read left to right, top to bottom within a band. Blocks that
    /// straddle a gutter and table regions split the page into sections; each
    /// precedes the column text below it.
    #[instrument(skip(self, blocks), fields(blocks = blocks.len()))]
    pub fn analyze(&self, page: usize, blocks: &mut Vec<TextBlock>) -> PageLayout {
        if blocks.is_empty() {
            return PageLayout {
                page,
                ..PageLayout::default()
            };
        }

        let tolerance = self.config.line_tolerance;
        let tables = detect_tables(blocks, tolerance, self.config.table_min_rows);
        let mut in_table = vec![false; blocks.len()];
        for (table_index, table) in tables.iter().enumerate() {
            for (row, cells) in table.rows.iter().enumerate() {
                for (column, index) in cells.iter().enumerate() {
                    in_table[*index] = true;
                    blocks[*index].table_cell = Some(TableCell {
                        table: table_index,
                        row,
                        column,
                    });
                }
            }
        }

        let flow: Vec<usize> = (0..blocks.len()).filter(|i| !in_table[*i]).collect();
        let flow_boxes: Vec<BoundingBox> = flow.iter().map(|i| blocks[*i].bbox).collect();
        let split = split_columns(&flow_boxes, self.config.column_gap_min);

        let boxes: Vec<BoundingBox> = blocks.iter().map(|b| b.bbox).collect();
        let mut anchors: Vec<(f32, Anchor)> = split
            .spanning
            .iter()
            .map(|local| (boxes[flow[*local]].y0, Anchor::Block(flow[*local])))
            .chain(
                tables
                    .iter()
                    .enumerate()
                    .map(|(index, table)| (table.region.bbox.y0, Anchor::Table(index))),
            )
            .collect();
        anchors.sort_by(|a, b| a.0.total_cmp(&b.0));

        let spanning: Vec<usize> = split.spanning.iter().map(|local| flow[*local]).collect();
        let band_count = split.bands.len().max(1);
        // sections[s][band] holds flow blocks above anchor `s` (the last section is below every anchor).
        let mut sections = vec![vec![Vec::new(); band_count]; anchors.len() + 1];
        for (local, index) in flow.iter().enumerate() {
            if spanning.contains(index) {
                continue;
            }
            let top = boxes[*index].y0;
            let section = anchors.iter().take_while(|(y, _)| *y <= top).count();
            let band = split.band_of(&flow_boxes[local]);
            sections[section][band].push(*index);
        }

        let mut order = Vec::with_capacity(blocks.len());
        for (section, bands) in sections.iter().enumerate() {
            for band in bands {
                order.extend(group_lines(band, &boxes, tolerance).into_iter().flatten());
            }
            if let Some((_, anchor)) = anchors.get(section) {
                match anchor {
                    Anchor::Block(index) => order.push(*index),
                    Anchor::Table(index) => order.extend(table_order(&tables[*index])),
                }
            }
        }

        apply_order(blocks, &order);
        let layout = PageLayout {
            page,
            columns: split.bands,
            tables: tables.into_iter().map(|t| t.region).collect(),
        };
        debug!(
            page,
            columns = layout.column_count(),
            tables = layout.tables.len(),
            "Page layout analysed"
        );
        layout
    }
}

fn table_order(table: &DetectedTable) -> impl Iterator<Item = usize> + '_ {
    table.rows.iter().flatten().copied()
}

/// Permute `blocks` into `order` and renumber their reading-order index.
fn apply_order(blocks: &mut Vec<TextBlock>, order: &[usize]) {
    let mut slots: Vec<Option<TextBlock>> = std::mem::take(blocks).into_iter().map(Some).collect();
    for index in order {
        if let Some(block) = slots.get_mut(*index).and_then(Option::take) {
            blocks.push(block);
        }
    }
    // Anything not placed keeps its original relative order at the end.
    blocks.extend(slots.into_iter().flatten());
    for (position, block) in blocks.iter_mut().enumerate() {
        block.reading_order = position;
    }
}
