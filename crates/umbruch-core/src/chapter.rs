// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Chapter boundaries and the ordered chapter tree.

use serde::{Deserialize, Serialize};

/// Signal that produced a chapter boundary, in fusion priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectionMethod {
    Outline,
    Typography,
    Pattern,
    ContentAnalysis,
}

impl DetectionMethod {
    /// Lower values win ties during fusion.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Outline => 0,
            Self::Typography => 1,
            Self::Pattern => 2,
            Self::ContentAnalysis => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Typography => "typography",
            Self::Pattern => "pattern",
            Self::ContentAnalysis => "content-analysis",
        }
    }
}

/// Start of a chapter or section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterBoundary {
    pub page: usize,
    /// Reading-order index of the first block on `page` that belongs to the chapter.
    pub offset: usize,
    pub title: Option<String>,
    /// Detection confidence, 0.0–1.0.
    pub confidence: f32,
    pub method: DetectionMethod,
    /// Hierarchy level, 1 for top-level chapters.
    pub level: u8,
}

impl ChapterBoundary {
    pub fn position(&self) -> (usize, usize) {
        (self.page, self.offset)
    }

    /// Whether `self` should replace `other` when both describe the same place.
    pub fn outranks(&self, other: &ChapterBoundary) -> bool {
        if (self.confidence - other.confidence).abs() > f32::EPSILON {
            self.confidence > other.confidence
        } else {
            self.method.priority() < other.method.priority()
        }
    }
}

/// Node of the nested view used for navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavNode {
    /// Index into [`ChapterTree::boundaries`].
    pub index: usize,
    pub children: Vec<NavNode>,
}

/// Ordered, non-overlapping sequence of chapter boundaries.
///
/// Construction sorts by position, collapses entries that share a start
/// position, and normalises levels so nesting is always well formed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterTree {
    boundaries: Vec<ChapterBoundary>,
}

impl ChapterTree {
    pub fn new(mut boundaries: Vec<ChapterBoundary>) -> Self {
        boundaries.sort_by(|a, b| {
            a.position()
                .cmp(&b.position())
                .then(a.method.priority().cmp(&b.method.priority()))
        });

        let mut unique: Vec<ChapterBoundary> = Vec::with_capacity(boundaries.len());
        for boundary in boundaries {
            match unique.last_mut() {
                Some(last) if last.position() == boundary.position() => {
                    if boundary.outranks(last) {
                        *last = boundary;
                    }
                }
                _ => unique.push(boundary),
            }
        }

        let mut previous_level = 0u8;
        for boundary in &mut unique {
            let level = boundary.level.max(1).min(previous_level + 1);
            boundary.level = level;
            boundary.confidence = boundary.confidence.clamp(0.0, 1.0);
            previous_level = level;
        }

        Self { boundaries: unique }
    }

    /// Single chapter covering the whole document.
    pub fn whole_document(title: Option<String>) -> Self {
        Self::new(vec![ChapterBoundary {
            page: 0,
            offset: 0,
            title,
            confidence: 0.5,
            method: DetectionMethod::Pattern,
            level: 1,
        }])
    }

    pub fn boundaries(&self) -> &[ChapterBoundary] {
        &self.boundaries
    }

    pub fn boundaries_mut(&mut self) -> &mut [ChapterBoundary] {
        &mut self.boundaries
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChapterBoundary> {
        self.boundaries.iter()
    }

    /// Mean confidence, 0.0 when the tree is empty.
    pub fn average_confidence(&self) -> f32 {
        if self.boundaries.is_empty() {
            return 0.0;
        }
        self.boundaries.iter().map(|b| b.confidence).sum::<f32>() / self.boundaries.len() as f32
    }

    /// Strictly increasing start positions.
    pub fn is_monotonic(&self) -> bool {
        self.boundaries
            .windows(2)
            .all(|pair| pair[0].position() < pair[1].position())
    }

    /// Index of the chapter that contains the given position, if any.
    pub fn chapter_at(&self, page: usize, offset: usize) -> Option<usize> {
        self.boundaries
            .iter()
            .rposition(|b| b.position() <= (page, offset))
    }

    /// Nested view following the level of each boundary.
    pub fn nested(&self) -> Vec<NavNode> {
        fn build(
            boundaries: &[ChapterBoundary],
            cursor: &mut usize,
            level: u8,
        ) -> Vec<NavNode> {
            let mut nodes = Vec::new();
            while *cursor < boundaries.len() && boundaries[*cursor].level >= level {
                if boundaries[*cursor].level > level {
                    // Deeper entry without a parent at this level; attach to
                    // the previous sibling or lift it to this level.
                    let children = build(boundaries, cursor, level + 1);
                    match nodes.last_mut() {
                        Some(NavNode { children: siblings, .. }) => siblings.extend(children),
                        None => nodes.extend(children),
                    }
                    continue;
                }
                let index = *cursor;
                *cursor += 1;
                let children = build(boundaries, cursor, level + 1);
                nodes.push(NavNode { index, children });
            }
            nodes
        }

        let mut cursor = 0;
        build(&self.boundaries, &mut cursor, 1)
    }
}
