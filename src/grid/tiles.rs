//! Splitting large grids and large list images into overlapping tiles.

use std::collections::HashMap;

use image::DynamicImage;

use super::mapper::{analyze_single_with_variants, CellVotes, GridMapper};
use crate::config::GridConfig;
use crate::error::Result;
use crate::imaging::{decode_image, diagnose_payload, encode_png};
use crate::model::{
    merge_requirements, sorted_requirements, ColorRequirement, GridAnalysisResult, PairingKinds,
};
use crate::ocr::{normalize_color_code, parse_by_location, parse_by_text, OcrProvider, OcrSession};

/// Tiles per side for a grid with more rows or columns than `max_cells`.
pub fn grid_split_count(rows: usize, cols: usize, max_cells: usize) -> usize {
    let max_size = rows.max(cols);
    if max_size <= max_cells.max(1) {
        return 1;
    }
    max_size.div_ceil(max_cells.max(1)).max(2)
}

/// Tiles per side for an image whose longer side exceeds `max_image_side`.
/// Undecodable payloads are never split.
pub fn image_split_count(payload: &str, config: &GridConfig) -> usize {
    let Some(img) = decode_image(payload) else {
        return 1;
    };
    let max_side = img.width().max(img.height());
    if max_side <= config.max_image_side {
        return 1;
    }
    (max_side.div_ceil(config.image_tile_side.max(1)) as usize).max(2)
}

/// `[start, end)` of part `index` when `total` is cut into `parts`.
fn span(index: usize, parts: usize, total: usize) -> (usize, usize) {
    (index * total / parts, (index + 1) * total / parts)
}

/// Pixel range covering cells `[start, end)` out of `cells` along a side of
/// `size` pixels. Always at least one pixel wide.
fn pixel_span(start: usize, end: usize, cells: usize, size: u32) -> (u32, u32) {
    let to_px = |cell: usize| (cell as f64 * size as f64 / cells as f64).round() as u32;
    let s = to_px(start).min(size.saturating_sub(1));
    let e = to_px(end).min(size).max(s + 1);
    (s, e)
}

/// One grid tile: the cells it covers (overlap included) and its pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridTile {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl GridTile {
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn cols(&self) -> usize {
        self.col_end - self.col_start
    }
}

/// Cuts a `rows x cols` grid over a `width x height` image into
/// `split x split` tiles that overlap their neighbours by one cell.
pub fn grid_tiles(rows: usize, cols: usize, split: usize, width: u32, height: u32) -> Vec<GridTile> {
    let split = split.max(1);
    let overlap = usize::from(split > 1);
    let mut tiles = Vec::new();

    for tile_row in 0..split {
        let (row_start, row_end) = span(tile_row, split, rows);
        if row_end <= row_start {
            continue;
        }
        let ext_row_start = row_start.saturating_sub(overlap);
        let ext_row_end = (row_end + overlap).min(rows);
        let (sy, ey) = pixel_span(ext_row_start, ext_row_end, rows, height);

        for tile_col in 0..split {
            let (col_start, col_end) = span(tile_col, split, cols);
            if col_end <= col_start {
                continue;
            }
            let ext_col_start = col_start.saturating_sub(overlap);
            let ext_col_end = (col_end + overlap).min(cols);
            let (sx, ex) = pixel_span(ext_col_start, ext_col_end, cols, width);

            tiles.push(GridTile {
                row_start: ext_row_start,
                row_end: ext_row_end,
                col_start: ext_col_start,
                col_end: ext_col_end,
                x: sx,
                y: sy,
                width: ex - sx,
                height: ey - sy,
            });
        }
    }
    tiles
}

/// Analyzes each tile on its own and merges the per-tile winners by vote.
///
/// Cells read in several tiles keep the code seen most often, ties going to
/// the smaller code. `ocr_count` is the sum over tiles. An undecodable
/// payload is analyzed as a single image.
///
/// A tile that fails is logged and skipped. Quota errors abort.
#[allow(clippy::too_many_arguments)]
pub fn analyze_grid_by_tiles<P: OcrProvider>(
    session: &mut OcrSession<'_, P>,
    mapper: &GridMapper,
    payload: &str,
    rows: usize,
    cols: usize,
    width: u32,
    height: u32,
    split: usize,
    config: &GridConfig,
) -> Result<GridAnalysisResult> {
    let Some(source) = decode_image(payload) else {
        return analyze_single_with_variants(session, mapper, payload, rows, cols, width, height, config);
    };
    let (source_width, source_height) = source.dimensions();
    let tiles = grid_tiles(rows, cols, split, source_width, source_height);
    crate::log(&format!(
        "grid tiles: split={}x{}, {} tiles over {}x{} px",
        split,
        split,
        tiles.len(),
        source_width,
        source_height
    ));

    let mut votes = CellVotes::new();
    let mut ocr_count = 0;
    for tile in &tiles {
        let cropped = image::imageops::crop_imm(&source, tile.x, tile.y, tile.width, tile.height).to_image();
        let Some(tile_base64) = encode_png(&DynamicImage::ImageRgb8(cropped)) else {
            continue;
        };

        let result = match analyze_single_with_variants(
            session,
            mapper,
            &tile_base64,
            tile.rows(),
            tile.cols(),
            tile.width,
            tile.height,
            config,
        ) {
            Ok(result) => result,
            Err(e) if e.is_quota() => return Err(e),
            Err(e) => {
                crate::log(&format!(
                    "grid tile rows {}..{} cols {}..{} skipped: {}",
                    tile.row_start, tile.row_end, tile.col_start, tile.col_end, e
                ));
                continue;
            }
        };
        ocr_count += result.ocr_count;

        for cell in &result.cells {
            let row = tile.row_start + cell.row;
            let col = tile.col_start + cell.col;
            let code = normalize_color_code(&cell.code);
            if row >= rows || col >= cols || code.is_empty() {
                continue;
            }
            votes.add(row, col, &code, 0.0);
        }
    }

    Ok(GridAnalysisResult::from_cells(rows, cols, ocr_count, votes.winners()))
}

/// Lists read tile by tile from an oversized list image.
#[derive(Debug, Clone, Default)]
pub struct TiledList {
    pub by_location: Vec<ColorRequirement>,
    pub by_text: Vec<ColorRequirement>,
    pub location_pairing: PairingKinds,
    pub text_pairing: PairingKinds,
    pub logs: Vec<String>,
}

/// Pixel overlap between list tiles along a side of `size` pixels.
fn list_overlap(size: u32) -> u32 {
    (size / 220).max(12)
}

/// Reads a list image as at least 2x2 overlapping tiles, running both the
/// location and the text parser on every tile and summing quantities per
/// code.
///
/// A failed tile call is logged and skipped unless it is a quota error,
/// which aborts the whole pass.
pub fn extract_list_by_tiles<P: OcrProvider>(
    session: &mut OcrSession<'_, P>,
    payload: &str,
    config: &GridConfig,
) -> Result<TiledList> {
    let Some(source) = decode_image(payload) else {
        return Ok(TiledList {
            logs: vec![format!(
                "tiled OCR fallback failed: image could not be decoded; {}",
                diagnose_payload(payload)
            )],
            ..TiledList::default()
        });
    };

    let split = image_split_count(payload, config).max(2);
    let (width, height) = source.dimensions();
    let (overlap_x, overlap_y) = (list_overlap(width), list_overlap(height));

    let mut merged_location: HashMap<String, u32> = HashMap::new();
    let mut merged_text: HashMap<String, u32> = HashMap::new();
    let mut location_pairing = PairingKinds::default();
    let mut text_pairing = PairingKinds::default();
    let mut logs = vec![format!(
        "tiled OCR fallback: split={}x{}, source size={}x{}",
        split, split, width, height
    )];

    for tile_row in 0..split {
        let (y_start, y_end) = span(tile_row, split, height as usize);
        let sy = (y_start as u32).saturating_sub(overlap_y);
        let ey = (y_end as u32 + overlap_y).min(height);

        for tile_col in 0..split {
            let (x_start, x_end) = span(tile_col, split, width as usize);
            let sx = (x_start as u32).saturating_sub(overlap_x);
            let ex = (x_end as u32 + overlap_x).min(width);

            let (tile_width, tile_height) = ((ex - sx).max(1), (ey - sy).max(1));
            let cropped = image::imageops::crop_imm(&source, sx, sy, tile_width, tile_height).to_image();
            let Some(tile_base64) = encode_png(&DynamicImage::ImageRgb8(cropped)) else {
                continue;
            };

            let name = format!("tile({}/{},{}/{})", tile_row + 1, split, tile_col + 1, split);
            logs.push(format!("reading {}, size={}x{}", name, tile_width, tile_height));

            match session.words_with_location(&tile_base64) {
                Ok(words) => {
                    let parse = parse_by_location(&words);
                    merge_requirements(&mut merged_location, &parse.colors);
                    location_pairing.union(parse.pairing);
                }
                Err(e) if e.is_quota() => return Err(e),
                Err(e) => logs.push(format!("{} location OCR failed: {}", name, e)),
            }

            match session.raw_text(&tile_base64) {
                Ok(text) => {
                    let parse = parse_by_text(&text);
                    merge_requirements(&mut merged_text, &parse.colors);
                    text_pairing.union(parse.pairing);
                }
                Err(e) if e.is_quota() => return Err(e),
                Err(e) => logs.push(format!("{} text OCR failed: {}", name, e)),
            }
        }
    }

    Ok(TiledList {
        by_location: sorted_requirements(merged_location),
        by_text: sorted_requirements(merged_text),
        location_pairing,
        text_pairing,
        logs,
    })
}
