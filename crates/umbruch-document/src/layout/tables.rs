// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Table candidates: runs of grid-aligned rows of short, single-line blocks.

use serde::{Deserialize, Serialize};
use umbruch_core::{BlockId, BoundingBox, TextBlock};

/// Cells taller than this many font sizes are wrapped prose, not table cells.
const MAX_CELL_LINES: f32 = 2.0;
/// Gap spread allowed between cell left edges, relative to the mean gap.
const MAX_GAP_SPREAD: f32 = 0.3;

/// A detected table region on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRegion {
    /// Index of the table on its page.
    pub index: usize,
    pub bbox: BoundingBox,
    pub rows: usize,
    pub columns: usize,
    /// Cell blocks in row-major order.
    pub cells: Vec<BlockId>,
}

/// A table with the block indices of each row, left to right.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DetectedTable {
    pub region: TableRegion,
    pub rows: Vec<Vec<usize>>,
}

/// Group block indices into lines: sorted by top edge, a new line starts when
/// the top moves more than `tolerance` from the line's first block. Each line
/// is sorted left to right.
pub(crate) fn group_lines(indices: &[usize], boxes: &[BoundingBox], tolerance: f32) -> Vec<Vec<usize>> {
    let mut sorted = indices.to_vec();
    sorted.sort_by(|a, b| boxes[*a].y0.total_cmp(&boxes[*b].y0));

    let mut lines: Vec<Vec<usize>> = Vec::new();
    for index in sorted {
        match lines.last_mut() {
            Some(line) if (boxes[index].y0 - boxes[line[0]].y0).abs() <= tolerance => line.push(index),
            _ => lines.push(vec![index]),
        }
    }
    for line in &mut lines {
        line.sort_by(|a, b| boxes[*a].x0.total_cmp(&boxes[*b].x0));
    }
    lines
}

fn is_cell(block: &TextBlock) -> bool {
    block.bbox.height() <= block.font.size.max(1.0) * MAX_CELL_LINES + 1.0
}

/// Left edges evenly spaced: standard deviation of the gaps below 0.3 of the mean.
fn regular_gaps(lefts: &[f32]) -> bool {
    if lefts.len() < 3 {
        return true;
    }
    let gaps: Vec<f32> = lefts.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let mean = gaps.iter().sum::<f32>() / gaps.len() as f32;
    if mean <= 0.0 {
        return false;
    }
    let variance = gaps.iter().map(|gap| (gap - mean).powi(2)).sum::<f32>() / gaps.len() as f32;
    variance.sqrt() < mean * MAX_GAP_SPREAD
}

fn aligned(a: &[f32], b: &[f32], tolerance: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}

/// Find table candidates among a page's blocks.
pub(crate) fn detect_tables(blocks: &[TextBlock], tolerance: f32, min_rows: usize) -> Vec<DetectedTable> {
    let boxes: Vec<BoundingBox> = blocks.iter().map(|b| b.bbox).collect();
    let candidates: Vec<usize> = (0..blocks.len()).filter(|i| is_cell(&blocks[*i])).collect();
    let lines = group_lines(&candidates, &boxes, tolerance);

    let lefts = |line: &[usize]| line.iter().map(|i| boxes[*i].x0).collect::<Vec<f32>>();
    let qualifies = |line: &[usize]| line.len() >= 2 && regular_gaps(&lefts(line));

    let mut tables = Vec::new();
    let mut run: Vec<Vec<usize>> = Vec::new();
    let flush = |run: &mut Vec<Vec<usize>>, tables: &mut Vec<DetectedTable>| {
        if run.len() >= min_rows.max(2) {
            let rows = std::mem::take(run);
            let cells: Vec<usize> = rows.iter().flatten().copied().collect();
            let bbox = cells
                .iter()
                .skip(1)
                .fold(boxes[cells[0]], |acc, i| acc.union(&boxes[*i]));
            tables.push(DetectedTable {
                region: TableRegion {
                    index: tables.len(),
                    bbox,
                    rows: rows.len(),
                    columns: rows[0].len(),
                    cells: cells.iter().map(|i| blocks[*i].id).collect(),
                },
                rows,
            });
        }
        run.clear();
    };

    for line in lines {
        if !qualifies(&line) {
            flush(&mut run, &mut tables);
            continue;
        }
        let continues = run
            .first()
            .is_some_and(|first| aligned(&lefts(first), &lefts(&line), tolerance));
        if !continues {
            flush(&mut run, &mut tables);
        }
        run.push(line);
    }
    flush(&mut run, &mut tables);
    tables
}
