//! Placing recognized codes into grid cells.

use std::collections::{BTreeMap, HashMap};

use image::DynamicImage;
use regex::Regex;

use crate::config::GridConfig;
use crate::error::Result;
use crate::geometry::{correct_perspective, detect_grid_geometry, GridGeometry};
use crate::imaging::{build_ocr_variants, decode_image, encode_png};
use crate::model::{GridAnalysisCell, GridAnalysisResult};
use crate::ocr::extract::clean_line;
use crate::ocr::tokens::{compare_codes, is_code_shaped, CODE_PATTERN};
use crate::ocr::{normalize_ocr_token, OcrProvider, OcrSession, OcrWord, TokenMatcher};

/// Longest chunk still tried as a whole token when it holds no code-shaped
/// substring.
const MAX_CHUNK_LEN: usize = 6;

/// A resolved code and the image point it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenHit {
    pub code: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    count: usize,
    min_distance: f64,
}

/// Per-cell tally of code votes.
#[derive(Debug, Default)]
pub struct CellVotes {
    cells: BTreeMap<(usize, usize), HashMap<String, Vote>>,
}

impl CellVotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, row: usize, col: usize, code: &str, distance: f64) {
        let vote = self
            .cells
            .entry((row, col))
            .or_default()
            .entry(code.to_string())
            .or_insert(Vote {
                count: 0,
                min_distance: f64::MAX,
            });
        vote.count += 1;
        vote.min_distance = vote.min_distance.min(distance);
    }

    /// One winner per cell: most votes, then closest to the cell center,
    /// then the smaller code.
    pub fn winners(&self) -> Vec<GridAnalysisCell> {
        self.cells
            .iter()
            .filter_map(|(&(row, col), votes)| {
                votes
                    .iter()
                    .min_by(|(code_a, a), (code_b, b)| {
                        b.count
                            .cmp(&a.count)
                            .then(a.min_distance.total_cmp(&b.min_distance))
                            .then_with(|| compare_codes(code_a, code_b))
                    })
                    .map(|(code, _)| GridAnalysisCell::new(row, col, code.clone()))
            })
            .collect()
    }
}

/// Reads code tokens out of located words and votes them into cells.
#[derive(Debug, Clone)]
pub struct GridMapper {
    matcher: TokenMatcher,
    pattern: Regex,
}

impl GridMapper {
    pub fn new(matcher: TokenMatcher) -> Result<Self> {
        Ok(Self {
            matcher,
            pattern: Regex::new(CODE_PATTERN)?,
        })
    }

    /// Resolved code tokens of one word with their estimated centers.
    ///
    /// The horizontal position of a token inside a multi-token word is
    /// interpolated from its character offset. Whitespace chunks without any
    /// code-shaped substring are tried whole, which recovers misreads such
    /// as `8LL`.
    pub fn token_hits(&self, word: &OcrWord) -> Vec<TokenHit> {
        let Some(bounds) = word.bounds else {
            return Vec::new();
        };
        let text = clean_line(&word.text);
        if text.is_empty() {
            return Vec::new();
        }

        let text_len = text.chars().count().max(1) as f64;
        let width = bounds.width.max(1) as f64;
        let y = bounds.center_y();
        let x_at = |start: usize, end: usize| {
            let mid = (start + end) as f64 / 2.0;
            bounds.left as f64 + mid / text_len * width
        };

        let mut hits = Vec::new();
        let mut offset = 0usize;
        for chunk in text.split(' ') {
            let chunk_start = offset;
            let chunk_len = chunk.chars().count();
            offset += chunk_len + 1;
            if chunk.is_empty() {
                continue;
            }

            let mut matched = false;
            for m in self.pattern.find_iter(chunk) {
                matched = true;
                let start = chunk_start + chunk[..m.start()].chars().count();
                let end = start + m.as_str().chars().count();
                let token = normalize_ocr_token(m.as_str());
                if let Some(code) = self.matcher.resolve(&token) {
                    hits.push(TokenHit {
                        code,
                        x: x_at(start, end),
                        y,
                    });
                }
            }

            if !matched && chunk_len <= MAX_CHUNK_LEN {
                let token = normalize_ocr_token(chunk);
                if is_code_shaped(&token)
                    && let Some(code) = self.matcher.resolve(&token)
                {
                    hits.push(TokenHit {
                        code,
                        x: x_at(chunk_start, chunk_start + chunk_len),
                        y,
                    });
                }
            }
        }
        hits
    }

    /// Votes every token hit into the cell of `geometry` containing it.
    ///
    /// `ocr_count` counts hits that landed in a cell; the result holds one
    /// winner per voted cell.
    pub fn map_words(
        &self,
        words: &[OcrWord],
        rows: usize,
        cols: usize,
        geometry: &GridGeometry,
    ) -> GridAnalysisResult {
        let geometry = geometry.clone().sanitize(rows, cols);
        let mut votes = CellVotes::new();
        let mut ocr_count = 0;

        for word in words {
            for hit in self.token_hits(word) {
                let Some((row, col)) = geometry.locate(hit.x, hit.y) else {
                    continue;
                };
                let (cx, cy) = geometry.cell_center(row, col);
                votes.add(row, col, &hit.code, (hit.x - cx).hypot(hit.y - cy));
                ocr_count += 1;
            }
        }

        GridAnalysisResult::from_cells(rows, cols, ocr_count, votes.winners())
    }
}

/// Minimum filled cells for a single OCR pass to be accepted without
/// retrying on variants.
pub fn fill_threshold(rows: usize, cols: usize, ratio: f64) -> usize {
    (((rows * cols) as f64 * ratio).floor() as usize).max(1)
}

/// The image actually sent to OCR for one grid, with the cell layout found
/// on it.
#[derive(Debug, Clone)]
pub struct PreparedGridImage {
    pub base64: String,
    pub geometry: GridGeometry,
    /// Perspective correction or line detection contributed to this image
    pub preprocessed: bool,
}

impl PreparedGridImage {
    /// Corrects perspective and detects grid lines where enabled.
    ///
    /// Preference order: corrected image with detected lines, original image
    /// with detected lines, original image with a uniform grid. An
    /// undecodable payload keeps its bytes and gets a uniform grid of
    /// `fallback_width x fallback_height`.
    pub fn prepare(
        payload: &str,
        rows: usize,
        cols: usize,
        fallback_width: u32,
        fallback_height: u32,
        config: &GridConfig,
    ) -> Self {
        let Some(original) = decode_image(payload) else {
            return Self::undecodable(payload, rows, cols, fallback_width, fallback_height);
        };

        let detect = |img: &image::RgbImage| {
            if !config.detect_boundaries {
                return None;
            }
            detect_grid_geometry(img, rows, cols)
                .inspect_err(|e| crate::log(&format!("grid lines not detected: {}", e)))
                .ok()
        };

        if config.perspective_correction {
            let correction = correct_perspective(&original);
            if correction.corrected
                && let Some(geometry) = detect(&correction.image)
            {
                return Self::encoded(correction.image, payload, geometry, true);
            }
        }

        if let Some(geometry) = detect(&original) {
            return Self::encoded(original, payload, geometry, true);
        }

        let (w, h) = original.dimensions();
        Self::encoded(original, payload, GridGeometry::uniform(rows, cols, w, h), false)
    }

    /// The uncorrected image with a uniform grid.
    pub fn baseline(
        payload: &str,
        rows: usize,
        cols: usize,
        fallback_width: u32,
        fallback_height: u32,
    ) -> Self {
        match decode_image(payload) {
            Some(original) => {
                let (w, h) = original.dimensions();
                Self::encoded(original, payload, GridGeometry::uniform(rows, cols, w, h), false)
            }
            None => Self::undecodable(payload, rows, cols, fallback_width, fallback_height),
        }
    }

    fn encoded(img: image::RgbImage, payload: &str, geometry: GridGeometry, preprocessed: bool) -> Self {
        let base64 = encode_png(&DynamicImage::ImageRgb8(img)).unwrap_or_else(|| payload.to_string());
        Self {
            base64,
            geometry,
            preprocessed,
        }
    }

    fn undecodable(payload: &str, rows: usize, cols: usize, width: u32, height: u32) -> Self {
        Self {
            base64: payload.to_string(),
            geometry: GridGeometry::uniform(rows, cols, width.max(1), height.max(1)),
            preprocessed: false,
        }
    }
}

/// One OCR pass over a prepared image. When it fills too few cells the
/// contrast and binary variants are read too and all words are voted
/// together; the fused result wins only if it fills at least as many cells.
///
/// Quota errors abort; any other failure of a variant call just skips it.
pub fn run_single_image_pipeline<P: OcrProvider>(
    session: &mut OcrSession<'_, P>,
    mapper: &GridMapper,
    prepared: &PreparedGridImage,
    rows: usize,
    cols: usize,
    config: &GridConfig,
) -> Result<GridAnalysisResult> {
    let mut words = session.words_with_location(&prepared.base64)?;
    let primary = mapper.map_words(&words, rows, cols, &prepared.geometry);
    if primary.filled_count >= fill_threshold(rows, cols, config.min_fill_ratio) {
        return Ok(primary);
    }

    let variants = build_ocr_variants(&prepared.base64);
    if variants.len() <= 1 {
        return Ok(primary);
    }

    for variant in variants.iter().skip(1) {
        match session.words_with_location(&variant.base64) {
            Ok(found) => words.extend(found.into_iter().map(|mut w| {
                w.bounds = w.bounds.map(|b| b.unscaled(variant.scale));
                w
            })),
            Err(e) if e.is_quota() => return Err(e),
            Err(e) => crate::log(&format!("grid variant OCR skipped: {}", e)),
        }
    }

    let fused = mapper.map_words(&words, rows, cols, &prepared.geometry);
    crate::log(&format!(
        "grid variants: primary filled {}, fused filled {}",
        primary.filled_count, fused.filled_count
    ));
    Ok(if fused.filled_count >= primary.filled_count {
        fused
    } else {
        primary
    })
}

/// Analyzes one grid image end to end.
///
/// A result from a preprocessed image that misses the fill threshold is
/// compared against a plain uniform-grid pass, which replaces it only when
/// strictly better.
#[allow(clippy::too_many_arguments)]
pub fn analyze_single_with_variants<P: OcrProvider>(
    session: &mut OcrSession<'_, P>,
    mapper: &GridMapper,
    payload: &str,
    rows: usize,
    cols: usize,
    width: u32,
    height: u32,
    config: &GridConfig,
) -> Result<GridAnalysisResult> {
    let prepared = PreparedGridImage::prepare(payload, rows, cols, width, height, config);
    let result = run_single_image_pipeline(session, mapper, &prepared, rows, cols, config)?;
    if result.filled_count >= fill_threshold(rows, cols, config.min_fill_ratio) || !prepared.preprocessed {
        return Ok(result);
    }

    let baseline = PreparedGridImage::baseline(payload, rows, cols, width, height);
    let fallback = run_single_image_pipeline(session, mapper, &baseline, rows, cols, config)?;
    crate::log(&format!(
        "grid baseline: preprocessed filled {}, baseline filled {}",
        result.filled_count, fallback.filled_count
    ));
    Ok(if fallback.filled_count > result.filled_count {
        fallback
    } else {
        result
    })
}
