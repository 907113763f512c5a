// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader: open and inspect source documents and extract per-page text
// blocks and images using the `lopdf` crate.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, info, instrument, warn};
use umbruch_core::{DocumentMetadata, OutlineEntry, PageInfo, Result, UmbruchError};

use super::content::ContentInterpreter;
use super::objects::{dict_get, inherited, number, resolve_dict, text_entry};
use super::outline::{PageIndex, read_outline};
use super::{DocumentSummary, ExtractedPage, scan_probability};

/// US Letter, used when a page carries no usable `MediaBox`.
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

/// Reads source PDF files.
///
/// Wraps `lopdf::Document` and exposes the document-level facts (metadata,
/// outline, page geometry) and per-page extraction the pipeline needs.
pub struct PdfReader {
    /// The underlying lopdf document.
    document: Document,
    /// Source path, if opened from a file (useful for diagnostics).
    source_path: Option<String>,
    /// Page object ids in page order (index 0 is the first page).
    page_ids: Vec<ObjectId>,
}

impl PdfReader {
    // -- Construction ---------------------------------------------------------

    /// Open a PDF from the filesystem.
    ///
    /// Fails with [`UmbruchError::Parse`] for malformed, encrypted, or empty documents.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        info!("Opening PDF: {}", path_ref.display());

        let document = Document::load(path_ref).map_err(|err| {
            UmbruchError::Parse(format!("failed to open {}: {}", path_ref.display(), err))
        })?;

        Self::from_document(document, Some(path_ref.display().to_string()))
    }

    /// Create a reader from raw PDF bytes already in memory.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data).map_err(|err| {
            UmbruchError::Parse(format!("failed to load PDF from memory: {}", err))
        })?;

        Self::from_document(document, None)
    }

    fn from_document(document: Document, source_path: Option<String>) -> Result<Self> {
        if document.is_encrypted() {
            return Err(UmbruchError::Parse(
                "document is encrypted; protected documents are not supported".into(),
            ));
        }

        // lopdf pages are keyed by 1-indexed page number, in order.
        let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(UmbruchError::Parse("document has no pages".into()));
        }

        debug!(pages = page_ids.len(), "PDF loaded");
        Ok(Self {
            document,
            source_path,
            page_ids,
        })
    }

    // -- Inspection -----------------------------------------------------------

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Return the source path if the reader was created via [`PdfReader::open`].
    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    /// Page size in points, from the (possibly inherited) `MediaBox`.
    pub fn page_size(&self, index: usize) -> (f32, f32) {
        let Some(&page_id) = self.page_ids.get(index) else {
            return DEFAULT_PAGE_SIZE;
        };
        let Some(Object::Array(corners)) = inherited(&self.document, page_id, b"MediaBox") else {
            return DEFAULT_PAGE_SIZE;
        };
        let values: Vec<f32> = corners.iter().filter_map(number).collect();
        match values.as_slice() {
            [x0, y0, x1, y1] if (x1 - x0).abs() > 0.0 && (y1 - y0).abs() > 0.0 => {
                ((x1 - x0).abs(), (y1 - y0).abs())
            }
            _ => DEFAULT_PAGE_SIZE,
        }
    }

    /// Descriptive metadata from the `Info` dictionary and the catalog `Lang`.
    pub fn metadata(&self) -> DocumentMetadata {
        let mut metadata = DocumentMetadata::default();

        if let Some(info) = self
            .document
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|info| resolve_dict(&self.document, info))
        {
            metadata.title = text_entry(&self.document, info, b"Title");
            metadata.author = text_entry(&self.document, info, b"Author");
            metadata.subject = text_entry(&self.document, info, b"Subject");
            metadata.producer = text_entry(&self.document, info, b"Producer");
            metadata.creation_date = text_entry(&self.document, info, b"CreationDate");
        }
        if let Ok(catalog) = self.document.catalog() {
            metadata.language = text_entry(&self.document, catalog, b"Lang");
        }
        metadata
    }

    /// The bookmark tree, flattened in document order.
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let heights = (0..self.page_count()).map(|i| self.page_size(i).1).collect();
        let index = PageIndex::new(&self.page_ids, heights);
        read_outline(&self.document, &index)
    }

    /// Structural summary used for early validation and the `inspect` command.
    #[instrument(skip(self))]
    pub fn inspect(&self) -> DocumentSummary {
        let has_outline = self
            .document
            .catalog()
            .ok()
            .and_then(|catalog| dict_get(&self.document, catalog, b"Outlines"))
            .and_then(|outlines| resolve_dict(&self.document, outlines))
            .is_some_and(|outlines| outlines.get(b"First").is_ok());

        let has_text = (0..self.page_count()).any(|index| self.page_shows_text(index));

        let summary = DocumentSummary {
            page_count: self.page_count(),
            encrypted: self.document.is_encrypted(),
            has_outline,
            has_text,
            metadata: self.metadata(),
        };
        info!(
            pages = summary.page_count,
            has_outline, has_text, "Document inspected"
        );
        summary
    }

    // -- Extraction -----------------------------------------------------------

    /// Extract text blocks, images, and page facts for one page (0-indexed).
    ///
    /// A page whose content stream cannot be decoded is reported empty rather
    /// than failing the document.
    #[instrument(skip(self), fields(page = index))]
    pub fn extract_page(&self, index: usize, glyph_density: f32) -> Result<ExtractedPage> {
        let page_id = *self.page_ids.get(index).ok_or_else(|| {
            UmbruchError::Parse(format!(
                "page {} out of range (document has {} pages)",
                index,
                self.page_ids.len()
            ))
        })?;
        let (width, height) = self.page_size(index);

        let Some(content) = self.decoded_content(page_id) else {
            warn!(page = index, "Page content unreadable; treating page as empty");
            return Ok(ExtractedPage::empty(index, width, height));
        };

        let resources = inherited(&self.document, page_id, b"Resources")
            .and_then(|res| resolve_dict(&self.document, res));
        let extracted = ContentInterpreter::new(&self.document, index, height).run(&content, resources);

        let char_count = extracted.blocks.iter().map(|b| b.char_count()).sum();
        let info = PageInfo {
            index,
            width,
            height,
            char_count,
            image_count: extracted.images.len(),
            scan_probability: scan_probability(char_count, width, height, glyph_density),
        };
        debug!(
            page = index,
            blocks = extracted.blocks.len(),
            images = info.image_count,
            scan_probability = info.scan_probability,
            "Page extracted"
        );

        Ok(ExtractedPage {
            info,
            blocks: extracted.blocks,
            images: extracted.images,
        })
    }

    // -- Helpers --------------------------------------------------------------

    fn decoded_content(&self, page_id: ObjectId) -> Option<Content> {
        let data = match self.document.get_page_content(page_id) {
            Ok(data) => data,
            Err(err) => {
                debug!(?page_id, %err, "Page content missing");
                return None;
            }
        };
        match Content::decode(&data) {
            Ok(content) => Some(content),
            Err(err) => {
                debug!(?page_id, %err, "Page content failed to decode");
                None
            }
        }
    }

    /// Cheap check for a text-showing operator with a non-empty string operand.
    fn page_shows_text(&self, index: usize) -> bool {
        let Some(content) = self.page_ids.get(index).and_then(|id| self.decoded_content(*id)) else {
            return false;
        };
        content.operations.iter().any(shows_text)
    }
}

fn shows_text(operation: &Operation) -> bool {
    let non_empty = |object: &Object| match object {
        Object::String(bytes, _) => bytes.iter().any(|b| !b.is_ascii_whitespace()),
        Object::Array(parts) => parts
            .iter()
            .any(|p| matches!(p, Object::String(bytes, _) if !bytes.is_empty())),
        _ => false,
    };
    matches!(operation.operator.as_str(), "Tj" | "TJ" | "'" | "\"")
        && operation.operands.iter().any(non_empty)
}
