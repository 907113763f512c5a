// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ocrs-backed text recognizer, compiled with the `ocr` feature.
//
// Models (`text-detection.rten`, `text-recognition.rten`) are read from
// `$UMBRUCH_OCR_MODELS` when set, otherwise from the cache directory that
// `ocrs-cli` downloads into. Build `ocrs` and `rten` with optimizations.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams, TextItem};
use rten::Model;
use rten_imageproc::Rect;
use tracing::{debug, info, instrument};
use umbruch_core::{BoundingBox, RecognizedLine, Result, UmbruchError};

use super::engine::TextRecognizer;
use super::script::line_confidence;

/// Overrides the model directory.
pub const MODEL_DIR_ENV: &str = "UMBRUCH_OCR_MODELS";

/// The two model files the engine loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl ModelFiles {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection: dir.join("text-detection.rten"),
            recognition: dir.join("text-recognition.rten"),
        }
    }

    /// `$UMBRUCH_OCR_MODELS`, then the `ocrs-cli` download cache.
    pub fn locate() -> Self {
        Self::in_dir(model_directory())
    }

    pub fn present(&self) -> bool {
        self.missing().is_none()
    }

    fn missing(&self) -> Option<&Path> {
        [&self.detection, &self.recognition]
            .into_iter()
            .find(|path| !path.is_file())
            .map(PathBuf::as_path)
    }
}

/// Line recognizer on the `ocrs` engine. Loading the models dominates the
/// cost, so one instance serves every page of every job.
pub struct OcrsRecognizer {
    engine: OcrEngine,
}

impl OcrsRecognizer {
    #[instrument(skip_all, fields(detection = %files.detection.display()))]
    pub fn load(files: &ModelFiles) -> Result<Self> {
        if let Some(path) = files.missing() {
            return Err(UmbruchError::Recognition(format!(
                "OCR model {} is missing; run `ocrs-cli` once or set {MODEL_DIR_ENV}",
                path.display()
            )));
        }

        let started = std::time::Instant::now();
        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(read_model(&files.detection)?),
            recognition_model: Some(read_model(&files.recognition)?),
            ..Default::default()
        })
        .map_err(|err| UmbruchError::Recognition(format!("OCR engine rejected its models: {err}")))?;

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "OCR models loaded");
        Ok(Self { engine })
    }

    /// Load from [`ModelFiles::locate`].
    pub fn with_defaults() -> Result<Self> {
        Self::load(&ModelFiles::locate())
    }
}

fn read_model(path: &Path) -> Result<Model> {
    Model::load_file(path)
        .map_err(|err| UmbruchError::Recognition(format!("cannot read OCR model {}: {err}", path.display())))
}

impl TextRecognizer for OcrsRecognizer {
    fn name(&self) -> &str {
        "ocrs"
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognizedLine>> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
            UmbruchError::Recognition(format!(
                "failed to create image source ({}x{}): {}",
                width, height, err
            ))
        })?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| UmbruchError::Recognition(format!("OCR preprocessing failed: {}", err)))?;

        let words = self
            .engine
            .detect_words(&input)
            .map_err(|err| UmbruchError::Recognition(format!("word detection failed: {}", err)))?;
        let line_rects = self.engine.find_text_lines(&input, &words);
        debug!(words = words.len(), lines = line_rects.len(), "Text lines found");

        let recognized = self
            .engine
            .recognize_text(&input, &line_rects)
            .map_err(|err| UmbruchError::Recognition(format!("line recognition failed: {}", err)))?;

        let lines: Vec<RecognizedLine> = recognized
            .iter()
            .flatten()
            .filter_map(|line| {
                let text = line.to_string();
                if text.trim().is_empty() {
                    return None;
                }
                Some(RecognizedLine {
                    confidence: line_confidence(&text),
                    bbox: Some(pixel_box(line.bounding_rect())),
                    text,
                })
            })
            .collect();

        debug!(lines = lines.len(), "OCR recognition complete");
        Ok(lines)
    }
}

fn pixel_box(rect: Rect) -> BoundingBox {
    BoundingBox::new(rect.left() as f32, rect.top() as f32, rect.right() as f32, rect.bottom() as f32)
}

/// Whether both model files are installed where [`ModelFiles::locate`] looks.
pub fn models_available() -> bool {
    ModelFiles::locate().present()
}

pub fn model_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os(MODEL_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let cache = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")));
    match cache {
        Some(cache) => cache.join("ocrs"),
        None => PathBuf::from("ocrs-models"),
    }
}
