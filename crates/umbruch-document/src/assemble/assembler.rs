// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output assembly: chapters, navigation, images, and stylesheet in one package.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info, instrument, warn};
use umbruch_core::package::{ContentUnit, NavPoint, PackageMetadata, PackagedImage};
use umbruch_core::{
    BlockId, ChapterTree, DocumentMetadata, ImageAsset, NavNode, OutputPackage, Result,
    SourceOfTruth, TextBlock, UmbruchError,
};

use crate::pdf::ExtractedPage;

use super::markup::{BodyItem, ChapterWriter, chapter_document, collapse};
use super::stylesheet::{STYLESHEET_HREF, primary_language, stylesheet_for};

/// Title used when the document carries none.
const UNTITLED: &str = "Untitled";

/// Everything the assembler turns into a package.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub tree: &'a ChapterTree,
    /// Pages with blocks in reading order.
    pub pages: &'a [ExtractedPage],
    pub images: &'a [ImageAsset],
    pub metadata: &'a DocumentMetadata,
    /// Unique package identifier, e.g. `urn:uuid:...`.
    pub identifier: &'a str,
}

/// Turns analysed pages into an [`OutputPackage`]. Callers run
/// [`validate_package`] on the result before writing it.
pub trait PackageAssembler: Send + Sync {
    fn assemble(&self, input: &AssemblyInput<'_>) -> Result<OutputPackage>;
}

/// Builds the [`OutputPackage`] for the custom pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputAssembler;

impl PackageAssembler for OutputAssembler {
    fn assemble(&self, input: &AssemblyInput<'_>) -> Result<OutputPackage> {
        OutputAssembler::assemble(self, input)
    }
}

impl OutputAssembler {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(chapters = input.tree.len(), pages = input.pages.len(), images = input.images.len()))]
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Result<OutputPackage> {
        let tree: Cow<'_, ChapterTree> = if input.tree.is_empty() {
            Cow::Owned(ChapterTree::whole_document(input.metadata.title.clone()))
        } else {
            Cow::Borrowed(input.tree)
        };

        let (script, language) = primary_language(
            input.metadata,
            input
                .pages
                .iter()
                .flat_map(|page| page.blocks.iter().map(|block| block.text.as_str())),
        );
        let stylesheet = stylesheet_for(script);
        debug!(?script, language = %language, "Primary language selected");

        let streams = chapter_streams(&tree, input.pages, input.images);

        let mut chapters = Vec::with_capacity(tree.len());
        let mut images: Vec<PackagedImage> = Vec::new();
        let mut packaged_ids: HashSet<&str> = HashSet::new();

        for (index, (boundary, items)) in tree.iter().zip(&streams).enumerate() {
            let number = index + 1;
            let title = boundary
                .title
                .as_deref()
                .map(collapse)
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| format!("Chapter {number}"));

            let mut writer = ChapterWriter::new();
            let mut image_refs: Vec<String> = Vec::new();
            for item in items {
                if let BodyItem::Image(image) = item {
                    if !image_refs.contains(&image.id) {
                        image_refs.push(image.id.clone());
                    }
                    if packaged_ids.insert(image.id.as_str()) {
                        images.push(packaged(image));
                    }
                }
                writer.push(*item, |image| format!("../{}", image_href(image)));
            }

            let markup = chapter_document(
                &title,
                boundary.level,
                &language,
                &format!("../{STYLESHEET_HREF}"),
                &writer.finish(),
            );
            chapters.push(ContentUnit {
                id: format!("chapter-{number:03}"),
                href: format!("text/chapter-{number:03}.xhtml"),
                title,
                level: boundary.level,
                markup,
                image_refs,
            });
        }

        let navigation = navigation(&tree.nested(), &chapters);
        let package = OutputPackage {
            metadata: PackageMetadata {
                identifier: input.identifier.to_string(),
                title: input
                    .metadata
                    .title
                    .as_deref()
                    .map(collapse)
                    .filter(|title| !title.is_empty())
                    .unwrap_or_else(|| UNTITLED.to_string()),
                author: input.metadata.author.clone(),
                language,
                description: input.metadata.subject.clone(),
            },
            chapters,
            images,
            navigation,
            stylesheet: Some(stylesheet),
            source_of_truth: SourceOfTruth::Custom,
            artifact: None,
        };

        if package.nav_entry_count() != tree.len() {
            return Err(UmbruchError::AssemblyValidation(format!(
                "navigation has {} entries for {} chapters",
                package.nav_entry_count(),
                tree.len()
            )));
        }
        validate_package(&package)?;

        info!(
            chapters = package.chapters.len(),
            images = package.images.len(),
            language = %package.metadata.language,
            "Output package assembled"
        );
        Ok(package)
    }
}

/// Check that every navigation entry and image reference resolves.
pub fn validate_package(package: &OutputPackage) -> Result<()> {
    if package.chapters.is_empty() {
        return Err(UmbruchError::AssemblyValidation(
            "package has no content units".into(),
        ));
    }

    let hrefs: HashSet<&str> = package.chapters.iter().map(|c| c.href.as_str()).collect();
    let mut pending: Vec<&NavPoint> = package.navigation.iter().collect();
    while let Some(point) = pending.pop() {
        if !hrefs.contains(point.target.as_str()) {
            return Err(UmbruchError::AssemblyValidation(format!(
                "navigation entry '{}' points at missing content unit {}",
                point.title, point.target
            )));
        }
        pending.extend(point.children.iter());
    }

    let image_ids: HashSet<&str> = package.images.iter().map(|i| i.id.as_str()).collect();
    for chapter in &package.chapters {
        if let Some(missing) = chapter
            .image_refs
            .iter()
            .find(|id| !image_ids.contains(id.as_str()))
        {
            return Err(UmbruchError::AssemblyValidation(format!(
                "{} references image {} which is not embedded",
                chapter.href, missing
            )));
        }
    }
    Ok(())
}

/// Package path of an image.
pub fn image_href(image: &ImageAsset) -> String {
    format!("images/{}.{}", image.id, image.encoding.extension())
}

fn packaged(image: &ImageAsset) -> PackagedImage {
    PackagedImage {
        id: image.id.clone(),
        href: image_href(image),
        encoding: image.encoding,
        kind: image.kind,
        width: image.width,
        height: image.height,
        bytes: image.bytes.clone(),
    }
}

fn navigation(nodes: &[NavNode], chapters: &[ContentUnit]) -> Vec<NavPoint> {
    nodes
        .iter()
        .filter_map(|node| {
            let chapter = chapters.get(node.index)?;
            Some(NavPoint {
                title: chapter.title.clone(),
                target: chapter.href.clone(),
                children: navigation(&node.children, chapters),
            })
        })
        .collect()
}

/// Distribute blocks and images over chapters, in reading order.
///
/// Unassociated images open their page. Associated images follow their block.
/// Content ahead of the first boundary belongs to the first chapter.
fn chapter_streams<'a>(
    tree: &ChapterTree,
    pages: &'a [ExtractedPage],
    images: &'a [ImageAsset],
) -> Vec<Vec<BodyItem<'a>>> {
    let mut streams: Vec<Vec<BodyItem<'a>>> = vec![Vec::new(); tree.len()];
    let chapter_of = |page: usize, offset: usize| tree.chapter_at(page, offset).unwrap_or(0);

    let known_blocks: HashSet<BlockId> = pages
        .iter()
        .flat_map(|page| page.blocks.iter().map(|block| block.id))
        .collect();
    let mut after_block: HashMap<BlockId, Vec<&'a ImageAsset>> = HashMap::new();
    let mut page_start: HashMap<usize, Vec<&'a ImageAsset>> = HashMap::new();
    for image in images {
        match image.associated_block {
            Some(block) if known_blocks.contains(&block) => {
                after_block.entry(block).or_default().push(image)
            }
            _ => page_start.entry(image.page).or_default().push(image),
        }
    }
    for placed in after_block.values_mut().chain(page_start.values_mut()) {
        placed.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0));
    }

    let headings = heading_blocks(tree, pages);
    let by_index: HashMap<usize, &'a ExtractedPage> =
        pages.iter().map(|page| (page.info.index, page)).collect();
    let page_indices: BTreeSet<usize> = by_index.keys().chain(page_start.keys()).copied().collect();

    for index in page_indices {
        if let Some(opening) = page_start.get(&index) {
            if !by_index.contains_key(&index) {
                warn!(page = index, images = opening.len(), "Images placed on a page without text");
            }
            let stream = &mut streams[chapter_of(index, 0)];
            stream.extend(opening.iter().copied().map(BodyItem::Image));
        }
        let Some(&page) = by_index.get(&index) else {
            continue;
        };
        for block in ordered(&page.blocks) {
            let stream = &mut streams[chapter_of(index, block.reading_order)];
            if !headings.contains(&block.id) {
                stream.push(BodyItem::Paragraph(block));
            }
            if let Some(following) = after_block.get(&block.id) {
                stream.extend(following.iter().copied().map(BodyItem::Image));
            }
        }
    }
    streams
}

fn ordered(blocks: &[TextBlock]) -> Vec<&TextBlock> {
    let mut ordered: Vec<&TextBlock> = blocks.iter().collect();
    ordered.sort_by_key(|block| block.reading_order);
    ordered
}

/// Blocks that spell out a chapter's title at its start position.
///
/// A title may span several consecutive blocks when a heading wraps.
fn heading_blocks(tree: &ChapterTree, pages: &[ExtractedPage]) -> HashSet<BlockId> {
    let mut headings = HashSet::new();
    for boundary in tree.iter() {
        let Some(title) = boundary.title.as_deref() else {
            continue;
        };
        let Some(page) = pages.iter().find(|page| page.info.index == boundary.page) else {
            continue;
        };
        let title = collapse(title).to_lowercase();
        let mut remaining = title.as_str();
        for block in ordered(&page.blocks)
            .into_iter()
            .filter(|block| block.reading_order >= boundary.offset)
        {
            let text = collapse(&block.text).to_lowercase();
            if text.is_empty() {
                continue;
            }
            let Some(rest) = remaining.strip_prefix(text.as_str()) else {
                break;
            };
            headings.insert(block.id);
            remaining = rest.trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation());
            if remaining.is_empty() {
                break;
            }
        }
    }
    headings
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbruch_core::{
        BlockOrigin, BoundingBox, ChapterBoundary, DetectionMethod, FontDescriptor,
        ImageEncoding, ImageKind,
    };

    fn block(page: usize, order: usize, text: &str) -> TextBlock {
        let y0 = 72.0 + order as f32 * 30.0;
        TextBlock {
            id: BlockId { page, seq: order },
            page,
            bbox: BoundingBox::new(72.0, y0, 520.0, y0 + 20.0),
            font: FontDescriptor::default(),
            text: text.to_string(),
            reading_order: order,
            origin: BlockOrigin::Extracted,
            table_cell: None,
        }
    }

    fn page(index: usize, texts: &[&str]) -> ExtractedPage {
        let mut page = ExtractedPage::empty(index, 595.0, 842.0);
        page.blocks = texts
            .iter()
            .enumerate()
            .map(|(order, text)| block(index, order, text))
            .collect();
        page
    }

    fn boundary(page: usize, offset: usize, title: &str, level: u8) -> ChapterBoundary {
        ChapterBoundary {
            page,
            offset,
            title: Some(title.to_string()),
            confidence: 0.95,
            method: DetectionMethod::Outline,
            level,
        }
    }

    fn image(id: &str, page: usize, y0: f32, block: Option<BlockId>) -> ImageAsset {
        ImageAsset {
            id: id.to_string(),
            page,
            bbox: BoundingBox::new(100.0, y0, 300.0, y0 + 100.0),
            bytes: vec![1, 2, 3],
            encoding: ImageEncoding::Jpeg,
            kind: ImageKind::Photographic,
            width: 200,
            height: 100,
            associated_block: block,
            alt_text: Some("A lighthouse".into()),
        }
    }

    fn assemble(
        tree: &ChapterTree,
        pages: &[ExtractedPage],
        images: &[ImageAsset],
    ) -> Result<OutputPackage> {
        OutputAssembler::new().assemble(&AssemblyInput {
            tree,
            pages,
            images,
            metadata: &DocumentMetadata {
                title: Some("Harbour Notes".into()),
                author: Some("A. Keeper".into()),
                ..Default::default()
            },
            identifier: "urn:uuid:test",
        })
    }

    #[test]
    fn one_unit_per_chapter_with_matching_navigation() {
        let pages = vec![
            page(0, &["Preface text before any chapter."]),
            page(1, &["Chapter 1", "It began at dawn."]),
            page(2, &["1.1 The Tide", "Water rose."]),
            page(3, &["Chapter 2", "Night fell."]),
        ];
        let tree = ChapterTree::new(vec![
            boundary(1, 0, "Chapter 1", 1),
            boundary(2, 0, "1.1 The Tide", 2),
            boundary(3, 0, "Chapter 2", 1),
        ]);
        let package = assemble(&tree, &pages, &[]).expect("assembles");

        assert_eq!(package.chapters.len(), 3);
        assert_eq!(package.chapters[0].id, "chapter-001");
        assert_eq!(package.chapters[2].href, "text/chapter-003.xhtml");
        assert_eq!(package.navigation.len(), 2);
        assert_eq!(package.navigation[0].children.len(), 1);
        assert_eq!(package.navigation[0].children[0].target, "text/chapter-002.xhtml");
        assert_eq!(package.nav_entry_count(), tree.len());
        assert_eq!(package.source_of_truth, SourceOfTruth::Custom);
        assert_eq!(package.metadata.title, "Harbour Notes");

        let first = &package.chapters[0].markup;
        assert!(first.contains("<p>Preface text before any chapter.</p>"));
        assert!(first.find("Preface") < first.find("It began at dawn."));
        assert!(package.chapters[1].markup.contains(r#"<h2 class="chapter-title">1.1 The Tide</h2>"#));
    }

    #[test]
    fn heading_block_is_not_repeated() {
        let pages = vec![page(0, &["The Long", "Night", "Body text here."])];
        let tree = ChapterTree::new(vec![boundary(0, 0, "The Long Night", 1)]);
        let package = assemble(&tree, &pages, &[]).expect("assembles");
        let markup = &package.chapters[0].markup;
        assert!(markup.contains(r#"<h1 class="chapter-title">The Long Night</h1>"#));
        assert!(!markup.contains("<p>The Long</p>"));
        assert!(!markup.contains("<p>Night</p>"));
        assert!(markup.contains("<p>Body text here.</p>"));
    }

    #[test]
    fn images_follow_their_block_or_open_their_page() {
        let pages = vec![page(0, &["Chapter 1", "The lamp was lit.", "The end."])];
        let images = vec![
            image("img-a", 0, 100.0, Some(BlockId { page: 0, seq: 1 })),
            image("img-b", 0, 400.0, None),
        ];
        let tree = ChapterTree::new(vec![boundary(0, 0, "Chapter 1", 1)]);
        let package = assemble(&tree, &pages, &images).expect("assembles");
        let markup = &package.chapters[0].markup;

        let b = markup.find("img-b").expect("unassociated image placed");
        let lamp = markup.find("The lamp was lit.").expect("text placed");
        let a = markup.find("img-a").expect("associated image placed");
        let end = markup.find("The end.").expect("text placed");
        assert!(b < lamp && lamp < a && a < end);
        assert_eq!(package.images.len(), 2);
        assert_eq!(package.images[0].href, "images/img-b.jpg");
        assert!(markup.contains(r#"src="../images/img-a.jpg""#));
    }

    #[test]
    fn shared_images_are_packaged_once() {
        let pages = vec![page(0, &["One"]), page(1, &["Two"])];
        let images = vec![image("img-logo", 0, 10.0, None), image("img-logo", 1, 10.0, None)];
        let tree = ChapterTree::new(vec![boundary(0, 0, "One", 1), boundary(1, 0, "Two", 1)]);
        let package = assemble(&tree, &pages, &images).expect("assembles");
        assert_eq!(package.images.len(), 1);
        assert_eq!(package.chapters[0].image_refs, vec!["img-logo".to_string()]);
        assert_eq!(package.chapters[1].image_refs, vec!["img-logo".to_string()]);
    }

    #[test]
    fn empty_tree_becomes_single_chapter() {
        let pages = vec![page(0, &["Just some text."])];
        let package = assemble(&ChapterTree::default(), &pages, &[]).expect("assembles");
        assert_eq!(package.chapters.len(), 1);
        assert_eq!(package.chapters[0].title, "Harbour Notes");
    }

    #[test]
    fn untitled_chapters_are_numbered() {
        let pages = vec![page(0, &["a"]), page(1, &["b"])];
        let mut second = boundary(1, 0, "", 1);
        second.title = None;
        let tree = ChapterTree::new(vec![boundary(0, 0, "Opening", 1), second]);
        let package = assemble(&tree, &pages, &[]).expect("assembles");
        assert_eq!(package.chapters[1].title, "Chapter 2");
    }

    #[test]
    fn validation_catches_dangling_references() {
        let pages = vec![page(0, &["Text"])];
        let tree = ChapterTree::new(vec![boundary(0, 0, "Only", 1)]);
        let mut package = assemble(&tree, &pages, &[]).expect("assembles");
        assert!(validate_package(&package).is_ok());

        package.chapters[0].image_refs.push("img-missing".into());
        assert!(matches!(
            validate_package(&package),
            Err(UmbruchError::AssemblyValidation(_))
        ));

        package.chapters[0].image_refs.clear();
        package.navigation[0].target = "text/nowhere.xhtml".into();
        assert!(matches!(
            validate_package(&package),
            Err(UmbruchError::AssemblyValidation(_))
        ));
    }
}
