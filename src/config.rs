//! Engine configuration.
//!
//! Loads settings from config.json at startup. Provides OCR credentials and
//! endpoints, grid pipeline limits, color fallback limits, and the list-mode
//! confidence weights.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variables that override the credential fields.
const ENV_API_KEY: &str = "BAIDU_OCR_AK";
const ENV_SECRET_KEY: &str = "BAIDU_OCR_SK";
const ENV_API_KEY2: &str = "BAIDU_OCR_AK2";
const ENV_SECRET_KEY2: &str = "BAIDU_OCR_SK2";

/// One API key / secret key pair for the OCR provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub api_key: String,
    pub secret_key: String,
}

/// OCR provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Backup pair, used when the first one hits its daily quota
    #[serde(default)]
    pub api_key2: String,
    #[serde(default)]
    pub secret_key2: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Recognition endpoints are `<base_url>/<endpoint>`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum spacing between two OCR calls across the whole process
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_token_url() -> String {
    "https://aip.baidubce.com/oauth/2.0/token".to_string()
}

fn default_base_url() -> String {
    "https://aip.baidubce.com/rest/2.0/ocr/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_min_interval_ms() -> u64 {
    500
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            api_key2: String::new(),
            secret_key2: String::new(),
            token_url: default_token_url(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl OcrConfig {
    /// Returns the configured credential pairs in rotation order.
    /// Pairs with a blank half are skipped.
    pub fn key_pairs(&self) -> Vec<KeyPair> {
        [(&self.api_key, &self.secret_key), (&self.api_key2, &self.secret_key2)]
            .into_iter()
            .filter(|(ak, sk)| !ak.trim().is_empty() && !sk.trim().is_empty())
            .map(|(ak, sk)| KeyPair {
                api_key: ak.trim().to_string(),
                secret_key: sk.trim().to_string(),
            })
            .collect()
    }

    /// Replaces credential fields with values from `lookup` (normally the
    /// process environment) when present and non-blank.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut String); 4] = [
            (ENV_API_KEY, &mut self.api_key),
            (ENV_SECRET_KEY, &mut self.secret_key),
            (ENV_API_KEY2, &mut self.api_key2),
            (ENV_SECRET_KEY2, &mut self.secret_key2),
        ];
        for (name, field) in fields {
            if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        }
    }
}

/// Limits and toggles for the grid pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridConfig {
    /// Fill ratio below which extra OCR passes are attempted
    #[serde(default = "default_min_fill_ratio")]
    pub min_fill_ratio: f64,
    /// Largest grid side handled in one OCR call
    #[serde(default = "default_max_cells_per_tile")]
    pub max_cells_per_tile: usize,
    /// Images with a longer side than this are split into tiles
    #[serde(default = "default_max_image_side")]
    pub max_image_side: u32,
    /// Target tile side when splitting by image size
    #[serde(default = "default_image_tile_side")]
    pub image_tile_side: u32,
    #[serde(default = "default_true")]
    pub perspective_correction: bool,
    /// Detect grid lines instead of assuming uniform spacing
    #[serde(default = "default_true")]
    pub detect_boundaries: bool,
}

fn default_min_fill_ratio() -> f64 {
    0.72
}

fn default_max_cells_per_tile() -> usize {
    35
}

fn default_max_image_side() -> u32 {
    3400
}

fn default_image_tile_side() -> u32 {
    3000
}

fn default_true() -> bool {
    true
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_fill_ratio: default_min_fill_ratio(),
            max_cells_per_tile: default_max_cells_per_tile(),
            max_image_side: default_max_image_side(),
            image_tile_side: default_image_tile_side(),
            perspective_correction: true,
            detect_boundaries: true,
        }
    }
}

/// Limits for filling empty cells by color.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FillConfig {
    /// Largest accepted Lab distance between a cell and a candidate color
    #[serde(default = "default_max_distance")]
    pub max_distance: f64,
    /// Share of all cells that may be filled by color
    #[serde(default = "default_max_fill_ratio")]
    pub max_fill_ratio: f64,
    /// Each side of a sampled cell is trimmed by `size / margin_divisor`
    #[serde(default = "default_margin_divisor")]
    pub margin_divisor: u32,
}

fn default_max_distance() -> f64 {
    32.0
}

fn default_max_fill_ratio() -> f64 {
    0.35
}

fn default_margin_divisor() -> u32 {
    5
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            max_distance: default_max_distance(),
            max_fill_ratio: default_max_fill_ratio(),
            margin_divisor: default_margin_divisor(),
        }
    }
}

/// Weights for the list-mode confidence score.
///
/// Tuned by hand against real pattern photos; treat them as knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub per_item: f64,
    pub total_cap: u32,
    pub per_total: f64,
    pub max_cap: u32,
    pub per_max: f64,
    pub per_valid_code: f64,
    /// Bonus when the average quantity is at least 2
    pub bulk_bonus: f64,
    pub heavy_single_min_items: usize,
    pub heavy_single_ratio: f64,
    pub heavy_single_penalty: f64,
    pub single_min_items: usize,
    pub single_ratio: f64,
    pub single_penalty: f64,
    pub low_average: f64,
    pub low_average_min_items: usize,
    pub low_average_penalty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            per_item: 4.0,
            total_cap: 3000,
            per_total: 0.08,
            max_cap: 500,
            per_max: 0.12,
            per_valid_code: 1.6,
            bulk_bonus: 8.0,
            heavy_single_min_items: 8,
            heavy_single_ratio: 0.85,
            heavy_single_penalty: 18.0,
            single_min_items: 6,
            single_ratio: 0.75,
            single_penalty: 8.0,
            low_average: 1.25,
            low_average_min_items: 6,
            low_average_penalty: 6.0,
        }
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub fill: FillConfig,
    #[serde(default)]
    pub scoring: ScoreWeights,
}

impl ScanConfig {
    /// Reads a config file. Missing sections and fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Loads configuration from `explicit` or the default locations, then applies
/// credential overrides from the environment. Falls back to defaults when no
/// file is found or it fails to parse.
pub fn load_config(explicit: Option<&Path>) -> ScanConfig {
    let candidates: Vec<PathBuf> = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => crate::paths::get_config_candidates(),
    };

    let mut config = ScanConfig::default();
    for path in candidates {
        crate::log(&format!("Looking for config at: {}", path.display()));
        if !path.exists() {
            continue;
        }
        match ScanConfig::from_file(&path) {
            Ok(loaded) => {
                crate::log(&format!("Config loaded from {}", path.display()));
                config = loaded;
                break;
            }
            Err(e) => {
                crate::log(&format!(
                    "Failed to parse {}: {}. Using defaults.",
                    path.display(),
                    e
                ));
                break;
            }
        }
    }

    config.ocr.apply_overrides(|name| std::env::var(name).ok());
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.ocr.min_interval_ms, 500);
        assert_eq!(config.grid.min_fill_ratio, 0.72);
        assert_eq!(config.grid.max_cells_per_tile, 35);
        assert_eq!(config.fill.max_distance, 32.0);
        assert_eq!(config.scoring.per_item, 4.0);
        assert!(config.ocr.key_pairs().is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ocr": {{"api_key": "ak", "secret_key": "sk"}}, "grid": {{"min_fill_ratio": 0.5}}}}"#
        )
        .unwrap();

        let config = ScanConfig::from_file(file.path()).unwrap();
        assert_eq!(config.grid.min_fill_ratio, 0.5);
        assert_eq!(config.grid.max_image_side, 3400);
        assert_eq!(config.ocr.token_url, default_token_url());
        assert_eq!(
            config.ocr.key_pairs(),
            vec![KeyPair { api_key: "ak".into(), secret_key: "sk".into() }]
        );
    }

    #[test]
    fn test_invalid_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ScanConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_load_config_falls_back_on_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{").unwrap();
        let config = load_config(Some(file.path()));
        assert_eq!(config.grid.max_cells_per_tile, 35);
    }

    #[test]
    fn test_key_pairs_skip_blank_halves() {
        let config = OcrConfig {
            api_key: " ak ".into(),
            secret_key: "sk".into(),
            api_key2: "ak2".into(),
            secret_key2: "   ".into(),
            ..OcrConfig::default()
        };
        let pairs = config.key_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].api_key, "ak");
    }

    #[test]
    fn test_overrides_replace_credentials() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BAIDU_OCR_AK2", "env-ak2"),
            ("BAIDU_OCR_SK2", "env-sk2"),
            ("BAIDU_OCR_AK", ""),
        ]);
        let mut config = OcrConfig {
            api_key: "file-ak".into(),
            secret_key: "file-sk".into(),
            ..OcrConfig::default()
        };
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_key, "file-ak");
        let pairs = config.key_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].api_key, "env-ak2");
        assert_eq!(pairs[1].secret_key, "env-sk2");
    }
}
