// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Outline (bookmark) tree walking and destination resolution.

use std::collections::{HashMap, HashSet};

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;
use umbruch_core::OutlineEntry;

use super::objects::{decode_text_string, dict_get, name, number, resolve, resolve_dict, text_entry};

/// Guards against runaway trees in damaged files.
const MAX_OUTLINE_ENTRIES: usize = 10_000;
const MAX_NAME_TREE_DEPTH: usize = 16;

/// Page lookup used while resolving destinations.
pub struct PageIndex {
    by_id: HashMap<ObjectId, usize>,
    heights: Vec<f32>,
}

impl PageIndex {
    pub fn new(page_ids: &[ObjectId], heights: Vec<f32>) -> Self {
        Self {
            by_id: page_ids.iter().enumerate().map(|(index, id)| (*id, index)).collect(),
            heights,
        }
    }

    fn page_of(&self, id: ObjectId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    fn height(&self, page: usize) -> f32 {
        self.heights.get(page).copied().unwrap_or(792.0)
    }
}

/// A resolved destination: page plus optional top coordinate in page space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Destination {
    page: usize,
    top: Option<f32>,
}

/// Flatten the outline into document order. Entries whose destination cannot
/// be resolved are dropped.
pub fn read_outline(document: &Document, pages: &PageIndex) -> Vec<OutlineEntry> {
    let Ok(catalog) = document.catalog() else {
        return Vec::new();
    };
    let Some(root) = dict_get(document, catalog, b"Outlines").and_then(|o| resolve_dict(document, o)) else {
        return Vec::new();
    };

    let mut walker = OutlineWalker {
        document,
        catalog,
        pages,
        visited: HashSet::new(),
        entries: Vec::new(),
    };
    if let Ok(first) = root.get(b"First") {
        walker.walk(first, 1);
    }
    debug!(entries = walker.entries.len(), "Outline read");
    walker.entries
}

struct OutlineWalker<'a> {
    document: &'a Document,
    catalog: &'a Dictionary,
    pages: &'a PageIndex,
    visited: HashSet<ObjectId>,
    entries: Vec<OutlineEntry>,
}

impl<'a> OutlineWalker<'a> {
    fn walk(&mut self, first: &'a Object, level: u8) {
        let mut cursor = Some(first);
        while let Some(object) = cursor {
            if self.entries.len() >= MAX_OUTLINE_ENTRIES {
                return;
            }
            let Object::Reference(id) = object else {
                return;
            };
            if !self.visited.insert(*id) {
                debug!(?id, "Outline cycle detected");
                return;
            }
            let Ok(item) = self.document.get_dictionary(*id) else {
                return;
            };

            let title = text_entry(self.document, item, b"Title").unwrap_or_default();
            match self.destination_of(item) {
                Some(dest) if !title.is_empty() => self.entries.push(OutlineEntry {
                    title,
                    level,
                    page: dest.page,
                    top: dest.top,
                }),
                _ => debug!(?id, "Outline item without usable destination"),
            }

            if let Ok(child) = item.get(b"First") {
                self.walk(child, level.saturating_add(1));
            }
            cursor = item.get(b"Next").ok();
        }
    }

    fn destination_of(&self, item: &Dictionary) -> Option<Destination> {
        if let Some(dest) = dict_get(self.document, item, b"Dest") {
            return self.resolve_destination(dest, 0);
        }
        let action = dict_get(self.document, item, b"A").and_then(|a| resolve_dict(self.document, a))?;
        if dict_get(self.document, action, b"S").and_then(name) != Some(b"GoTo".as_slice()) {
            return None;
        }
        let target = dict_get(self.document, action, b"D")?;
        self.resolve_destination(target, 0)
    }

    fn resolve_destination(&self, dest: &Object, hops: usize) -> Option<Destination> {
        if hops > 2 {
            return None;
        }
        match dest {
            Object::Array(parts) => self.explicit_destination(parts),
            Object::Name(key) => {
                let dests = dict_get(self.document, self.catalog, b"Dests")
                    .and_then(|d| resolve_dict(self.document, d))?;
                let target = dict_get(self.document, dests, key)?;
                self.resolve_named_target(target, hops)
            }
            Object::String(key, _) => {
                let names = dict_get(self.document, self.catalog, b"Names")
                    .and_then(|n| resolve_dict(self.document, n))?;
                let tree = dict_get(self.document, names, b"Dests")
                    .and_then(|t| resolve_dict(self.document, t))?;
                let target = self.lookup_name_tree(tree, key, 0)?;
                self.resolve_named_target(target, hops)
            }
            _ => None,
        }
    }

    /// Named targets are either a destination array or a dictionary with `D`.
    fn resolve_named_target(&self, target: &Object, hops: usize) -> Option<Destination> {
        match target {
            Object::Dictionary(dict) => {
                let inner = dict_get(self.document, dict, b"D")?;
                self.resolve_destination(inner, hops + 1)
            }
            other => self.resolve_destination(other, hops + 1),
        }
    }

    fn explicit_destination(&self, parts: &[Object]) -> Option<Destination> {
        let page = match parts.first()? {
            Object::Reference(id) => self.pages.page_of(*id)?,
            // Remote-style destinations carry a 0-based page number.
            Object::Integer(index) => usize::try_from(*index).ok()?,
            _ => return None,
        };
        let kind = parts.get(1).and_then(name);
        let top = match kind {
            Some(b"XYZ") => parts.get(3),
            Some(b"FitH") | Some(b"FitBH") => parts.get(2),
            _ => None,
        }
        .and_then(|value| resolve(self.document, value))
        .and_then(number)
        .map(|top| (self.pages.height(page) - top).max(0.0));
        Some(Destination { page, top })
    }

    fn lookup_name_tree(&self, node: &'a Dictionary, key: &[u8], depth: usize) -> Option<&'a Object> {
        if depth > MAX_NAME_TREE_DEPTH {
            return None;
        }
        if let Some(Object::Array(names)) = dict_get(self.document, node, b"Names") {
            for pair in names.chunks(2) {
                if let [Object::String(candidate, _), value] = pair
                    && (candidate.as_slice() == key
                        || decode_text_string(candidate) == decode_text_string(key))
                {
                    return resolve(self.document, value);
                }
            }
        }
        if let Some(Object::Array(kids)) = dict_get(self.document, node, b"Kids") {
            for kid in kids {
                if let Some(kid) = resolve_dict(self.document, kid)
                    && let Some(found) = self.lookup_name_tree(kid, key, depth + 1)
                {
                    return Some(found);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    /// Two pages, a catalog, and an outline with one nested entry.
    fn outlined_document() -> (Document, Vec<ObjectId>) {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let page_a = document.add_object(dictionary! { "Type" => "Page", "Parent" => pages_id });
        let page_b = document.add_object(dictionary! { "Type" => "Page", "Parent" => pages_id });
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_a.into(), page_b.into()],
                "Count" => 2,
            }),
        );

        let outlines_id = document.new_object_id();
        let first_id = document.new_object_id();
        let child_id = document.new_object_id();
        let second_id = document.new_object_id();
        document.objects.insert(
            first_id,
            Object::Dictionary(dictionary! {
                "Title" => Object::string_literal("Introduction"),
                "Parent" => outlines_id,
                "Next" => second_id,
                "First" => child_id,
                "Dest" => vec![page_a.into(), "XYZ".into(), 0.into(), 742.into(), 0.into()],
            }),
        );
        document.objects.insert(
            child_id,
            Object::Dictionary(dictionary! {
                "Title" => Object::string_literal("Background"),
                "Parent" => first_id,
                "A" => dictionary! { "S" => "GoTo", "D" => vec![page_a.into(), "Fit".into()] },
            }),
        );
        document.objects.insert(
            second_id,
            Object::Dictionary(dictionary! {
                "Title" => Object::string_literal("Results"),
                "Parent" => outlines_id,
                "Dest" => Object::Name(b"results".to_vec()),
                // Cycle back to the first entry must be ignored.
                "Next" => first_id,
            }),
        );
        document.objects.insert(
            outlines_id,
            Object::Dictionary(dictionary! {
                "Type" => "Outlines",
                "First" => first_id,
                "Last" => second_id,
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "Outlines" => outlines_id,
            "Dests" => dictionary! { "results" => vec![page_b.into(), "XYZ".into(), 0.into(), 792.into(), 0.into()] },
        });
        document.trailer.set("Root", catalog_id);
        (document, vec![page_a, page_b])
    }

    #[test]
    fn outline_is_flattened_in_document_order() {
        let (document, page_ids) = outlined_document();
        let index = PageIndex::new(&page_ids, vec![792.0, 792.0]);
        let entries = read_outline(&document, &index);

        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Background", "Results"]);
        assert_eq!(entries[1].level, 2);
        assert_eq!(entries[2].page, 1);
    }

    #[test]
    fn xyz_top_is_converted_to_page_space() {
        let (document, page_ids) = outlined_document();
        let index = PageIndex::new(&page_ids, vec![792.0, 792.0]);
        let entries = read_outline(&document, &index);
        assert_eq!(entries[0].top, Some(50.0));
        assert_eq!(entries[1].top, None);
        assert_eq!(entries[2].top, Some(0.0));
    }

    #[test]
    fn document_without_outline_yields_nothing() {
        let mut document = Document::with_version("1.5");
        let catalog_id = document.add_object(dictionary! { "Type" => "Catalog" });
        document.trailer.set("Root", catalog_id);
        let index = PageIndex::new(&[], Vec::new());
        assert!(read_outline(&document, &index).is_empty());
    }
}
