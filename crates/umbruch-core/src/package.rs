// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The assembled output package: chapters, images, navigation, metadata, and
// stylesheet, plus which pipeline produced it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{ImageEncoding, ImageKind, Script, SourceOfTruth};

/// One chapter rendered as an XHTML document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    /// Manifest id, e.g. `chapter-003`.
    pub id: String,
    /// Path inside the package, e.g. `text/chapter-003.xhtml`.
    pub href: String,
    pub title: String,
    pub level: u8,
    pub markup: String,
    /// Ids of images referenced from `markup`.
    pub image_refs: Vec<String>,
}

/// Entry of the navigation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub title: String,
    /// `href` of the target content unit.
    pub target: String,
    pub children: Vec<NavPoint>,
}

impl NavPoint {
    /// Number of entries in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(NavPoint::count).sum::<usize>()
    }
}

/// An image embedded in the package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagedImage {
    pub id: String,
    pub href: String,
    pub encoding: ImageEncoding,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Stylesheet chosen for the package's primary script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stylesheet {
    pub script: Script,
    pub href: String,
    pub css: String,
}

/// Metadata written into the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub identifier: String,
    pub title: String,
    pub author: Option<String>,
    pub language: String,
    pub description: Option<String>,
}

/// Final output of a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPackage {
    pub metadata: PackageMetadata,
    pub chapters: Vec<ContentUnit>,
    pub images: Vec<PackagedImage>,
    pub navigation: Vec<NavPoint>,
    pub stylesheet: Option<Stylesheet>,
    pub source_of_truth: SourceOfTruth,
    /// Written container on disk, once Generation has persisted it.
    pub artifact: Option<PathBuf>,
}

impl OutputPackage {
    /// Package that only points at a file produced by the external engine.
    pub fn external(metadata: PackageMetadata, artifact: PathBuf) -> Self {
        Self {
            metadata,
            chapters: Vec::new(),
            images: Vec::new(),
            navigation: Vec::new(),
            stylesheet: None,
            source_of_truth: SourceOfTruth::Fallback,
            artifact: Some(artifact),
        }
    }

    pub fn nav_entry_count(&self) -> usize {
        self.navigation.iter().map(NavPoint::count).sum()
    }
}
