// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Umbruch conversion pipeline.
//
// Page indices are 0-based throughout. Page-space coordinates are in PDF points
// with the origin at the top-left corner and y growing downwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UmbruchError;

/// Unique identifier for a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

/// States of a conversion job, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Analysis,
    Extraction,
    Recognition,
    Structure,
    Enhancement,
    Generation,
    Completed,
    FallbackCompleted,
    Failed,
}

impl Stage {
    /// Working stages in execution order.
    pub const WORKING: [Stage; 6] = [
        Stage::Analysis,
        Stage::Extraction,
        Stage::Recognition,
        Stage::Structure,
        Stage::Enhancement,
        Stage::Generation,
    ];

    /// Share of the overall job progress (percent) this stage accounts for.
    ///
    /// Extraction and Recognition split the 30% extraction share between them.
    pub fn progress_weight(&self) -> f32 {
        match self {
            Self::Analysis => 10.0,
            Self::Extraction => 15.0,
            Self::Recognition => 15.0,
            Self::Structure => 20.0,
            Self::Enhancement => 20.0,
            Self::Generation => 20.0,
            Self::Completed | Self::FallbackCompleted | Self::Failed => 0.0,
        }
    }

    /// Overall percentage reached when this stage starts.
    pub fn progress_offset(&self) -> f32 {
        match self {
            Self::Completed | Self::FallbackCompleted => 100.0,
            Self::Failed => 0.0,
            working => Self::WORKING
                .iter()
                .take_while(|stage| *stage != working)
                .map(Stage::progress_weight)
                .sum(),
        }
    }

    /// Whether the job has stopped in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FallbackCompleted | Self::Failed)
    }

    /// Lowercase label for logs and progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Extraction => "extraction",
            Self::Recognition => "recognition",
            Self::Structure => "structure",
            Self::Enhancement => "enhancement",
            Self::Generation => "generation",
            Self::Completed => "completed",
            Self::FallbackCompleted => "fallback-completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Named configuration bundle trading speed against output fidelity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Fast,
    #[default]
    Standard,
    High,
}

impl QualityPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for QualityPreset {
    type Err = UmbruchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            other => Err(UmbruchError::Config(format!(
                "unknown quality preset {other:?} (expected fast, standard, or high)"
            ))),
        }
    }
}

impl std::fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pipeline produced the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOfTruth {
    Custom,
    Fallback,
}

/// Wall-clock time spent in one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u64,
}

/// One entry on a job's progress channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub stage: Stage,
    /// Completion of the current stage, 0–100.
    pub stage_percent: f32,
    /// Completion of the whole job, 0–100. Never decreases within a job.
    pub overall_percent: f32,
    pub message: String,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Axis-aligned rectangle in page space (top-left origin).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    /// Build a box from two corners in any order.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }

    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Whether the horizontal extents of the two boxes intersect.
    pub fn overlaps_horizontally(&self, other: &BoundingBox) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FontWeight {
    #[default]
    Regular,
    Bold,
}

/// Font family, size, and weight of a text run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FontDescriptor {
    pub family: String,
    /// Effective size in points (font size scaled by the text matrix).
    pub size: f32,
    pub weight: FontWeight,
}

impl FontDescriptor {
    pub fn is_bold(&self) -> bool {
        self.weight == FontWeight::Bold
    }
}

/// Stable identifier of a text block: page plus extraction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId {
    pub page: usize,
    pub seq: usize,
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}-b{}", self.page, self.seq)
    }
}

/// Where a text block's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockOrigin {
    /// Read from the document's content streams.
    Extracted,
    /// Produced by the recognition engine from a rendered page.
    Recognized,
}

/// Position of a block inside a detected table region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub table: usize,
    pub row: usize,
    pub column: usize,
}

/// A contiguous run of text on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub id: BlockId,
    pub page: usize,
    pub bbox: BoundingBox,
    pub font: FontDescriptor,
    pub text: String,
    /// Position in reading order within the page; unique per page.
    pub reading_order: usize,
    pub origin: BlockOrigin,
    /// Set by layout analysis when the block sits inside a table candidate.
    pub table_cell: Option<TableCell>,
}

impl TextBlock {
    /// Number of non-whitespace characters.
    pub fn char_count(&self) -> usize {
        self.text.chars().filter(|c| !c.is_whitespace()).count()
    }
}

/// Writing system family detected in a text sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Script {
    #[default]
    Latin,
    Cjk,
    Other,
}

impl Script {
    /// BCP 47 tag used when nothing better is known.
    pub fn default_language(&self) -> &'static str {
        match self {
            Self::Latin => "en",
            Self::Cjk => "zh",
            Self::Other => "und",
        }
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Encoded image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageEncoding {
    Jpeg,
    Png,
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Content class of an image, driving its output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageKind {
    Photographic,
    Diagram,
}

/// An image as it was found in the source, before optimisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawImage {
    pub page: usize,
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
    /// Hex SHA-256 of `bytes`.
    pub digest: String,
}

/// An optimised image ready for packaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub id: String,
    pub page: usize,
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    /// Weak relation to the text block this image belongs next to.
    pub associated_block: Option<BlockId>,
    pub alt_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Source document
// ---------------------------------------------------------------------------

/// Descriptive metadata, possibly incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub language: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
}

/// One entry of the document's bookmark tree, flattened in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub title: String,
    /// Nesting depth, 1 for top-level entries.
    pub level: u8,
    pub page: usize,
    /// Destination top coordinate in page space, when the target names one.
    pub top: Option<f32>,
}

/// Per-page facts gathered during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub index: usize,
    pub width: f32,
    pub height: f32,
    pub char_count: usize,
    pub image_count: usize,
    /// 0.0 when the page is full of extractable text, 1.0 when none was found.
    pub scan_probability: f32,
}

impl PageInfo {
    /// Whether the page carries anything at all.
    pub fn has_content(&self) -> bool {
        self.char_count > 0 || self.image_count > 0
    }
}

/// Everything known about the source after analysis and extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub page_count: usize,
    pub metadata: DocumentMetadata,
    pub outline: Vec<OutlineEntry>,
    pub pages: Vec<PageInfo>,
}

impl SourceDocument {
    /// Mean scan probability across pages, 0.0 for an empty document.
    pub fn scan_probability(&self) -> f32 {
        if self.pages.is_empty() {
            return 0.0;
        }
        self.pages.iter().map(|p| p.scan_probability).sum::<f32>() / self.pages.len() as f32
    }
}

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

/// One recognised line with its confidence (0–100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedLine {
    pub text: String,
    pub confidence: f32,
    /// Line position in page space, when the engine reports one.
    pub bbox: Option<BoundingBox>,
}

/// Recognition output for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub page: usize,
    pub lines: Vec<RecognizedLine>,
    /// Character-weighted mean of line confidences, 0–100.
    pub confidence: f32,
    pub script: Script,
}

impl RecognitionResult {
    /// Full page text, one line per recognised line.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.text.trim().is_empty())
    }
}
