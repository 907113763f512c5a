// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion configuration and quality presets.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UmbruchError};
use crate::quality::QualityWeights;
use crate::types::QualityPreset;

/// Time budgets for one preset, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBudgets {
    pub analysis_secs: u64,
    pub extraction_secs: u64,
    /// Budget for a single page on the recognition pool.
    pub recognition_page_secs: u64,
    /// Budget for the whole Recognition stage.
    pub recognition_secs: u64,
    pub structure_secs: u64,
    /// Budget for each content-enhancer call.
    pub enhancement_call_secs: u64,
    pub enhancement_secs: u64,
    pub generation_secs: u64,
}

impl StageBudgets {
    pub fn analysis(&self) -> Duration {
        Duration::from_secs(self.analysis_secs)
    }

    pub fn extraction(&self) -> Duration {
        Duration::from_secs(self.extraction_secs)
    }

    pub fn recognition_page(&self) -> Duration {
        Duration::from_secs(self.recognition_page_secs)
    }

    pub fn recognition(&self) -> Duration {
        Duration::from_secs(self.recognition_secs)
    }

    pub fn structure(&self) -> Duration {
        Duration::from_secs(self.structure_secs)
    }

    pub fn enhancement_call(&self) -> Duration {
        Duration::from_secs(self.enhancement_call_secs)
    }

    pub fn enhancement(&self) -> Duration {
        Duration::from_secs(self.enhancement_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

/// Settings bundled under one quality preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetProfile {
    /// Render resolution for pages sent to recognition.
    pub recognition_dpi: u32,
    /// Images wider than this are scaled down.
    pub image_max_width: u32,
    /// First JPEG quality tried for photographic images.
    pub jpeg_quality: u8,
    /// Whether the content enhancer is consulted.
    pub enhancement_enabled: bool,
    pub budgets: StageBudgets,
}

impl PresetProfile {
    pub fn fast() -> Self {
        Self {
            recognition_dpi: 150,
            image_max_width: 800,
            jpeg_quality: 70,
            enhancement_enabled: false,
            budgets: StageBudgets {
                analysis_secs: 30,
                extraction_secs: 120,
                recognition_page_secs: 20,
                recognition_secs: 300,
                structure_secs: 60,
                enhancement_call_secs: 10,
                enhancement_secs: 60,
                generation_secs: 120,
            },
        }
    }

    pub fn standard() -> Self {
        Self {
            recognition_dpi: 300,
            image_max_width: 1200,
            jpeg_quality: 85,
            enhancement_enabled: true,
            budgets: StageBudgets {
                analysis_secs: 60,
                extraction_secs: 300,
                recognition_page_secs: 60,
                recognition_secs: 1200,
                structure_secs: 120,
                enhancement_call_secs: 30,
                enhancement_secs: 300,
                generation_secs: 300,
            },
        }
    }

    pub fn high() -> Self {
        Self {
            recognition_dpi: 400,
            image_max_width: 1600,
            jpeg_quality: 95,
            enhancement_enabled: true,
            budgets: StageBudgets {
                analysis_secs: 120,
                extraction_secs: 600,
                recognition_page_secs: 120,
                recognition_secs: 3600,
                structure_secs: 300,
                enhancement_call_secs: 60,
                enhancement_secs: 600,
                generation_secs: 600,
            },
        }
    }
}

/// Profiles for every preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetTable {
    pub fast: PresetProfile,
    pub standard: PresetProfile,
    pub high: PresetProfile,
}

impl Default for PresetTable {
    fn default() -> Self {
        Self {
            fast: PresetProfile::fast(),
            standard: PresetProfile::standard(),
            high: PresetProfile::high(),
        }
    }
}

impl PresetTable {
    pub fn profile(&self, preset: QualityPreset) -> &PresetProfile {
        match preset {
            QualityPreset::Fast => &self.fast,
            QualityPreset::Standard => &self.standard,
            QualityPreset::High => &self.high,
        }
    }
}

/// Geometry tolerances used by layout analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Minimum empty horizontal gap (points) that separates two columns.
    pub column_gap_min: f32,
    /// Vertical distance (points) within which blocks share a line.
    pub line_tolerance: f32,
    /// Minimum number of aligned rows for a table candidate.
    pub table_min_rows: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            column_gap_min: 20.0,
            line_tolerance: 5.0,
            table_min_rows: 3,
        }
    }
}

/// External conversion engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program to execute, looked up on `PATH` when not absolute.
    pub program: String,
    /// Arguments appended after the input and output paths.
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "ebook-convert".into(),
            extra_args: vec![
                "--enable-heuristics".into(),
                "--keep-ligatures".into(),
                "--no-inline-toc".into(),
                "--pretty-print".into(),
            ],
            timeout_secs: 600,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Endpoint of an OpenAI-compatible chat completions service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`. `None` disables the adapter.
    pub base_url: Option<String>,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o-mini".into(),
            api_key_env: "UMBRUCH_AI_API_KEY".into(),
            request_timeout_secs: 60,
        }
    }
}

/// All tunables of a conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Pages whose scan probability exceeds this go to recognition.
    pub scan_threshold: f32,
    /// Expected characters per square point of a fully set page.
    pub glyph_density: f32,
    /// Page recognition confidence (0–100) below which a warning is raised.
    pub recognition_threshold: f32,
    /// Region confidence (0–1) below which the boundary advisor is consulted.
    pub structure_assist_threshold: f32,
    /// Candidates closer than this many pages are fused.
    pub fusion_window_pages: usize,
    /// Pages per region when judging structure confidence.
    pub region_pages: usize,
    /// Overall score (0–100) below which the external engine takes over.
    pub quality_threshold: f32,
    pub quality_weights: QualityWeights,
    /// Image count above which a scanned multi-column document is "complex".
    pub complexity_image_bound: usize,
    /// Scanned-page fraction above which a document counts as scanned.
    pub complexity_scanned_fraction: f32,
    /// Page/image workers per job.
    pub workers: usize,
    pub max_pages: usize,
    /// Upper bound on decoded image bytes held by one job.
    pub max_image_bytes: usize,
    /// Target encoded size per image.
    pub image_byte_budget: usize,
    pub layout: LayoutConfig,
    pub presets: PresetTable,
    pub engine: EngineConfig,
    pub enhancer: EnhancerConfig,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .min(8);
        Self {
            scan_threshold: 0.9,
            glyph_density: 0.006,
            recognition_threshold: 85.0,
            structure_assist_threshold: 0.7,
            fusion_window_pages: 2,
            region_pages: 10,
            quality_threshold: 60.0,
            quality_weights: QualityWeights::default(),
            complexity_image_bound: 50,
            complexity_scanned_fraction: 0.5,
            workers,
            max_pages: 5000,
            max_image_bytes: 512 * 1024 * 1024,
            image_byte_budget: 300 * 1024,
            layout: LayoutConfig::default(),
            presets: PresetTable::default(),
            engine: EngineConfig::default(),
            enhancer: EnhancerConfig::default(),
        }
    }
}

impl ConversionConfig {
    /// Load a JSON configuration file. Absent fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn profile(&self, preset: QualityPreset) -> &PresetProfile {
        self.presets.profile(preset)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        self.quality_weights.validate()?;

        let unit_ranged = [
            ("scan_threshold", self.scan_threshold),
            ("structure_assist_threshold", self.structure_assist_threshold),
            ("complexity_scanned_fraction", self.complexity_scanned_fraction),
        ];
        for (name, value) in unit_ranged {
            if !(0.0..=1.0).contains(&value) {
                return Err(UmbruchError::Config(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }

        for (name, value) in [
            ("recognition_threshold", self.recognition_threshold),
            ("quality_threshold", self.quality_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(UmbruchError::Config(format!(
                    "{name} must lie in [0, 100], got {value}"
                )));
            }
        }

        if self.glyph_density <= 0.0 {
            return Err(UmbruchError::Config("glyph_density must be positive".into()));
        }
        if self.workers == 0 {
            return Err(UmbruchError::Config("workers must be at least 1".into()));
        }
        if self.region_pages == 0 {
            return Err(UmbruchError::Config("region_pages must be at least 1".into()));
        }
        if self.image_byte_budget == 0 {
            return Err(UmbruchError::Config("image_byte_budget must be positive".into()));
        }
        for preset in [QualityPreset::Fast, QualityPreset::Standard, QualityPreset::High] {
            let profile = self.profile(preset);
            if profile.image_max_width == 0 || profile.recognition_dpi == 0 {
                return Err(UmbruchError::Config(format!(
                    "preset {preset} needs a non-zero image width and recognition DPI"
                )));
            }
            if !(1..=100).contains(&profile.jpeg_quality) {
                return Err(UmbruchError::Config(format!(
                    "preset {preset} JPEG quality must lie in 1..=100"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        assert!(ConversionConfig::default().validate().is_ok());
    }

    #[test]
    fn presets_scale_with_quality() {
        let config = ConversionConfig::default();
        let fast = config.profile(QualityPreset::Fast);
        let high = config.profile(QualityPreset::High);
        assert!(fast.image_max_width < high.image_max_width);
        assert!(fast.recognition_dpi < high.recognition_dpi);
        assert!(!fast.enhancement_enabled);
        assert!(high.enhancement_enabled);
    }

    #[test]
    fn load_merges_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "quality_threshold": 70.0, "workers": 3 }}"#).expect("write");

        let config = ConversionConfig::load(file.path()).expect("config should load");
        assert_eq!(config.quality_threshold, 70.0);
        assert_eq!(config.workers, 3);
        assert_eq!(config.scan_threshold, 0.9);
        assert_eq!(config.engine.program, "ebook-convert");
    }

    #[test]
    fn zero_workers_rejected() {
        let config = ConversionConfig {
            workers: 0,
            ..ConversionConfig::default()
        };
        assert!(matches!(config.validate(), Err(UmbruchError::Config(_))));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let config = ConversionConfig {
            scan_threshold: 1.5,
            ..ConversionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
