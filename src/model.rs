//! Request and result types shared by the list and grid pipelines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::ocr::tokens::{compare_codes, normalize_color_code};

/// One entry of a shopping list: a color code and how many beads it needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRequirement {
    pub code: String,
    pub quantity: u32,
}

impl ColorRequirement {
    pub fn new(code: impl Into<String>, quantity: u32) -> Self {
        Self {
            code: code.into(),
            quantity,
        }
    }
}

/// Adds `source` into `target`, summing quantities per normalized code.
/// Blank codes and zero quantities are dropped.
pub fn merge_requirements(target: &mut HashMap<String, u32>, source: &[ColorRequirement]) {
    for item in source {
        let code = normalize_color_code(&item.code);
        if code.is_empty() || item.quantity == 0 {
            continue;
        }
        let total = target.entry(code).or_insert(0);
        *total = total.saturating_add(item.quantity);
    }
}

/// Turns merged quantities into a list sorted by natural code order.
pub fn sorted_requirements(merged: HashMap<String, u32>) -> Vec<ColorRequirement> {
    let mut items: Vec<ColorRequirement> = merged
        .into_iter()
        .filter(|(code, qty)| !code.is_empty() && *qty > 0)
        .map(|(code, qty)| ColorRequirement::new(code, qty))
        .collect();
    items.sort_by(|a, b| compare_codes(&a.code, &b.code));
    items
}

/// A recognized code placed in a grid cell.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridAnalysisCell {
    pub row: usize,
    pub col: usize,
    pub code: String,
}

impl GridAnalysisCell {
    pub fn new(row: usize, col: usize, code: impl Into<String>) -> Self {
        Self {
            row,
            col,
            code: code.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridAnalysisResult {
    pub rows: usize,
    pub cols: usize,
    /// Token-to-cell assignments before voting
    pub ocr_count: usize,
    pub filled_count: usize,
    pub cells: Vec<GridAnalysisCell>,
    /// OCR services called while producing this result
    pub ocr_service_summary: String,
}

impl GridAnalysisResult {
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            ..Self::default()
        }
    }

    /// Builds a result with cells sorted by (row, col) and `filled_count` in sync.
    pub fn from_cells(rows: usize, cols: usize, ocr_count: usize, mut cells: Vec<GridAnalysisCell>) -> Self {
        cells.sort_by_key(|c| (c.row, c.col));
        Self {
            rows,
            cols,
            ocr_count,
            filled_count: cells.len(),
            cells,
            ocr_service_summary: String::new(),
        }
    }
}

/// A crop rectangle in source image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl CropRect {
    /// Parses `x,y,w,h`.
    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<i64> = text
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [x, y, width, height] => Some(Self {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            _ => None,
        }
    }
}

/// Inputs of a grid analysis request.
#[derive(Clone, Debug, Default)]
pub struct GridRequest {
    pub image_base64: String,
    pub rows: i64,
    pub cols: i64,
    /// Size the caller measured; used when the image cannot be decoded
    pub image_width: i64,
    pub image_height: i64,
    pub candidate_codes: Vec<String>,
    pub candidate_quantities: Option<HashMap<String, u32>>,
    pub candidate_color_hex: Option<HashMap<String, String>>,
    pub crop: Option<CropRect>,
}

/// Which heuristics paired codes with quantities in a list parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PairingKinds {
    pub block: bool,
    pub double_line: bool,
    pub single_line: bool,
}

impl PairingKinds {
    /// Adds the heuristics used by another parse, e.g. of a neighbouring tile.
    pub fn union(&mut self, other: PairingKinds) {
        self.block |= other.block;
        self.double_line |= other.double_line;
        self.single_line |= other.single_line;
    }

    pub fn strategy(&self) -> PairingStrategy {
        match (self.double_line, self.single_line) {
            (true, true) => PairingStrategy::Mixed,
            (true, false) => PairingStrategy::DoubleLine,
            (false, true) if self.block => PairingStrategy::Mixed,
            (false, true) => PairingStrategy::SingleLine,
            (false, false) if self.block => PairingStrategy::Block,
            (false, false) => PairingStrategy::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingStrategy {
    Mixed,
    DoubleLine,
    SingleLine,
    Block,
    Unknown,
}

impl fmt::Display for PairingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PairingStrategy::Mixed => "mixed",
            PairingStrategy::DoubleLine => "double-line",
            PairingStrategy::SingleLine => "single-line",
            PairingStrategy::Block => "block",
            PairingStrategy::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How a list-mode debug result was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Location(PairingStrategy),
    Text(PairingStrategy),
    EmptyImage,
    CropFailed,
    QuotaLimit,
    NoResult,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStrategy::Location(p) => write!(f, "location-{}", p),
            ExtractionStrategy::Text(p) => write!(f, "text-{}", p),
            ExtractionStrategy::EmptyImage => f.write_str("empty-image"),
            ExtractionStrategy::CropFailed => f.write_str("crop-failed"),
            ExtractionStrategy::QuotaLimit => f.write_str("quota-limit"),
            ExtractionStrategy::NoResult => f.write_str("no-result"),
        }
    }
}

impl Serialize for ExtractionStrategy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// List-mode result with the diagnostics gathered along the way.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugResult {
    pub colors: Vec<ColorRequirement>,
    pub strategy: ExtractionStrategy,
    pub ocr_service_summary: String,
    pub raw_text: String,
    /// Text of each grouped OCR line, numbered from 1
    pub location_lines: Vec<String>,
    pub pair_logs: Vec<String>,
    pub fallback_logs: Vec<String>,
}

impl DebugResult {
    pub fn new(strategy: ExtractionStrategy) -> Self {
        Self {
            colors: Vec::new(),
            strategy,
            ocr_service_summary: String::new(),
            raw_text: String::new(),
            location_lines: Vec::new(),
            pair_logs: Vec::new(),
            fallback_logs: Vec::new(),
        }
    }
}
