// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the umbruch-document crate: scanned-page deskew and
// two-column layout analysis on synthetic input.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{GrayImage, Luma};

use umbruch_core::{BlockId, BlockOrigin, BoundingBox, FontDescriptor, TextBlock};
use umbruch_document::LayoutAnalyzer;
use umbruch_document::recognition::preprocess::PagePreprocessor;

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Deskew a 400x400 page with slanted dark text lines.
fn bench_deskew(c: &mut Criterion) {
    let (width, height) = (400u32, 400u32);
    let mut img = GrayImage::from_pixel(width, height, Luma([245u8]));
    for line in 0..12u32 {
        let base = 40 + line * 28;
        for x in 40..360u32 {
            // Roughly two degrees of slant.
            let y = base + x / 28;
            for dy in 0..6 {
                if y + dy < height {
                    img.put_pixel(x, y + dy, Luma([20u8]));
                }
            }
        }
    }

    c.bench_function("deskew (400x400)", |b| {
        b.iter(|| {
            let page = PagePreprocessor::from_gray(black_box(img.clone())).deskew();
            black_box(page.skew_correction());
        });
    });
}

/// Reading order for a two-column page of 60 blocks.
fn bench_layout(c: &mut Criterion) {
    let blocks: Vec<TextBlock> = (0..60)
        .map(|seq| {
            let column = seq % 2;
            let row = (seq / 2) as f32;
            let x0 = if column == 0 { 56.0 } else { 312.0 };
            let y0 = 60.0 + row * 24.0;
            TextBlock {
                id: BlockId { page: 0, seq },
                page: 0,
                bbox: BoundingBox::new(x0, y0, x0 + 228.0, y0 + 18.0),
                font: FontDescriptor {
                    family: "Times".into(),
                    size: 10.0,
                    ..Default::default()
                },
                text: format!("Line {seq} of a column of ordinary body text."),
                reading_order: seq,
                origin: BlockOrigin::Extracted,
                table_cell: None,
            }
        })
        .collect();
    let analyzer = LayoutAnalyzer::default();

    c.bench_function("layout (2 columns, 60 blocks)", |b| {
        b.iter(|| {
            let mut page = black_box(blocks.clone());
            black_box(analyzer.analyze(0, &mut page));
        });
    });
}

criterion_group!(benches, bench_deskew, bench_layout);
criterion_main!(benches);
