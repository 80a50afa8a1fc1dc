//! Filling cells OCR left empty by matching their color against the
//! palette of the remaining candidate codes.

use std::collections::{HashMap, HashSet};

use image::RgbImage;
use palette::{FromColor, Lab, Srgb};

use crate::config::FillConfig;
use crate::imaging::decode_image;
use crate::model::{GridAnalysisCell, GridAnalysisResult};
use crate::ocr::normalize_color_code;

/// Pixels darker than this with little saturation are grid lines or printed
/// text, not bead color.
const DARK_LUMINANCE: u32 = 28;
const DARK_SPREAD: u8 = 40;
/// Gap reported when only one candidate is left to compare against.
const LONE_CANDIDATE_GAP: f64 = 100.0;

/// Parses `#RGB` or `#RRGGBB`, the `#` being optional.
pub fn parse_hex(hex: &str) -> Option<[u8; 3]> {
    let value = hex.trim();
    let value = value.strip_prefix('#').unwrap_or(value);
    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match value.len() {
        3 => value.chars().flat_map(|c| [c, c]).collect(),
        6 => value.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// CIE Lab (D65) of an 8-bit sRGB color.
pub fn to_lab(rgb: [u8; 3]) -> Lab {
    Lab::from_color(Srgb::new(
        rgb[0] as f32 / 255.0,
        rgb[1] as f32 / 255.0,
        rgb[2] as f32 / 255.0,
    ))
}

/// Euclidean distance in Lab.
pub fn color_distance(left: &Lab, right: &Lab) -> f64 {
    let dl = (left.l - right.l) as f64;
    let da = (left.a - right.a) as f64;
    let db = (left.b - right.b) as f64;
    (dl * dl + da * da + db * db).sqrt()
}

/// Average color of cell `(row, col)` under a uniform `rows x cols` grid.
///
/// The box is trimmed by `size / margin_divisor` (at least one pixel) per
/// side, falling back to the full box when trimming leaves nothing. Dark
/// unsaturated pixels are skipped; `None` when no pixel remains.
pub fn sample_cell_color(
    img: &RgbImage,
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
    margin_divisor: u32,
) -> Option<[u8; 3]> {
    let (width, height) = img.dimensions();
    let (x_start, x_end) = cell_span(col, cols, width);
    let (y_start, y_end) = cell_span(row, rows, height);

    let divisor = margin_divisor.max(1);
    let x_margin = ((x_end - x_start) / divisor).max(1);
    let y_margin = ((y_end - y_start) / divisor).max(1);
    let (mut sx, mut ex) = (x_start + x_margin, x_end.saturating_sub(x_margin).min(width));
    let (mut sy, mut ey) = (y_start + y_margin, y_end.saturating_sub(y_margin).min(height));
    if ex <= sx || ey <= sy {
        (sx, ex) = (x_start, x_end.min(width));
        (sy, ey) = (y_start, y_end.min(height));
        if ex <= sx || ey <= sy {
            return None;
        }
    }

    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for y in sy..ey {
        for x in sx..ex {
            let [r, g, b] = img.get_pixel(x, y).0;
            let spread = r.max(g).max(b) - r.min(g).min(b);
            let lum = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
            if lum < DARK_LUMINANCE && spread < DARK_SPREAD {
                continue;
            }
            sum[0] += r as u64;
            sum[1] += g as u64;
            sum[2] += b as u64;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let avg = |s: u64| (s as f64 / count as f64).round() as u8;
    Some([avg(sum[0]), avg(sum[1]), avg(sum[2])])
}

/// `[floor(i * size / n), ceil((i + 1) * size / n))`
fn cell_span(index: usize, count: usize, size: u32) -> (u32, u32) {
    let step = size as f64 / count as f64;
    let start = (index as f64 * step).floor() as u32;
    let end = ((index + 1) as f64 * step).ceil() as u32;
    (start, end)
}

struct Candidate {
    code: String,
    lab: Lab,
    remaining: u32,
}

struct CellMatch {
    row: usize,
    col: usize,
    candidate: usize,
    distance: f64,
    gap: f64,
}

/// Assigns palette codes to empty cells whose color is close to them.
///
/// Each candidate may fill at most its quantity minus the cells already
/// showing it. Cells whose best match is clearest (largest gap to the
/// runner-up) are filled first, up to `max_fill_ratio` of the grid.
/// `ocr_count` is left unchanged.
pub fn fill_missing_cells_by_color(
    payload: &str,
    mut current: GridAnalysisResult,
    candidate_codes: &[String],
    quantities: &HashMap<String, u32>,
    hex_colors: &HashMap<String, String>,
    config: &FillConfig,
) -> GridAnalysisResult {
    let (rows, cols) = (current.rows, current.cols);
    if rows == 0 || cols == 0 || candidate_codes.is_empty() || quantities.is_empty() {
        return current;
    }

    let quantities: HashMap<String, u32> = quantities
        .iter()
        .map(|(code, qty)| (normalize_color_code(code), *qty))
        .collect();
    let hex_colors: HashMap<String, &str> = hex_colors
        .iter()
        .map(|(code, hex)| (normalize_color_code(code), hex.as_str()))
        .collect();

    let mut seen = HashSet::new();
    let mut candidates: Vec<Candidate> = candidate_codes
        .iter()
        .map(|c| normalize_color_code(c))
        .filter(|code| !code.is_empty() && seen.insert(code.clone()))
        .filter_map(|code| {
            let remaining = quantities.get(&code).copied().filter(|&q| q > 0)?;
            let rgb = hex_colors.get(&code).and_then(|hex| parse_hex(hex))?;
            Some(Candidate {
                lab: to_lab(rgb),
                code,
                remaining,
            })
        })
        .collect();
    if candidates.is_empty() {
        return current;
    }

    let mut occupied = HashSet::new();
    for cell in &current.cells {
        if cell.row >= rows || cell.col >= cols {
            continue;
        }
        occupied.insert((cell.row, cell.col));
        let code = normalize_color_code(&cell.code);
        if let Some(candidate) = candidates.iter_mut().find(|c| c.code == code) {
            candidate.remaining = candidate.remaining.saturating_sub(1);
        }
    }
    if candidates.iter().all(|c| c.remaining == 0) {
        return current;
    }

    let Some(img) = decode_image(payload) else {
        crate::log("color fill skipped: image could not be decoded");
        return current;
    };

    let mut matches = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if occupied.contains(&(row, col)) {
                continue;
            }
            let Some(rgb) = sample_cell_color(&img, row, col, rows, cols, config.margin_divisor) else {
                continue;
            };
            let lab = to_lab(rgb);

            let mut best: Option<(usize, f64)> = None;
            let mut second: Option<f64> = None;
            for (i, candidate) in candidates.iter().enumerate() {
                if candidate.remaining == 0 {
                    continue;
                }
                let distance = color_distance(&lab, &candidate.lab);
                match best {
                    Some((_, best_distance)) if distance >= best_distance => {
                        if second.is_none_or(|s| distance < s) {
                            second = Some(distance);
                        }
                    }
                    _ => {
                        second = best.map(|(_, d)| d);
                        best = Some((i, distance));
                    }
                }
            }

            if let Some((candidate, distance)) = best
                && distance <= config.max_distance
            {
                let gap = second.map_or(LONE_CANDIDATE_GAP, |s| (s - distance).max(0.0));
                matches.push(CellMatch {
                    row,
                    col,
                    candidate,
                    distance,
                    gap,
                });
            }
        }
    }

    matches.sort_by(|a, b| {
        b.gap
            .total_cmp(&a.gap)
            .then(a.distance.total_cmp(&b.distance))
            .then(a.row.cmp(&b.row))
            .then(a.col.cmp(&b.col))
    });

    let max_fill = (((rows * cols) as f64 * config.max_fill_ratio).round() as usize).max(1);
    let mut filled = 0;
    for m in matches {
        if filled >= max_fill {
            break;
        }
        let candidate = &mut candidates[m.candidate];
        if candidate.remaining == 0 {
            continue;
        }
        candidate.remaining -= 1;
        current.cells.push(GridAnalysisCell::new(m.row, m.col, candidate.code.clone()));
        filled += 1;
    }

    if filled > 0 {
        crate::log(&format!("color fill: {} empty cells filled", filled));
    }
    current.cells.sort_by_key(|c| (c.row, c.col));
    current.filled_count = current.cells.len();
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::encode_png;
    use image::{DynamicImage, Rgb};

    const CELL: u32 = 20;

    /// Paints each cell with the color at `colors[row][col]`.
    fn painted(colors: &[&[[u8; 3]]]) -> String {
        let rows = colors.len() as u32;
        let cols = colors[0].len() as u32;
        let img = RgbImage::from_fn(cols * CELL, rows * CELL, |x, y| {
            Rgb(colors[(y / CELL) as usize][(x / CELL) as usize])
        });
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    fn make_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn make_quantities(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    const RED: [u8; 3] = [220, 30, 30];
    const BLUE: [u8; 3] = [30, 30, 220];

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("#FF0000"), Some([255, 0, 0]));
        assert_eq!(parse_hex("0a0B0c"), Some([10, 11, 12]));
        assert_eq!(parse_hex("#abc"), Some([0xaa, 0xbb, 0xcc]));
        assert_eq!(parse_hex("#12345"), None);
        assert_eq!(parse_hex("#GG0000"), None);
        assert_eq!(parse_hex(""), None);
    }

    #[test]
    fn test_color_distance() {
        let red = to_lab(RED);
        assert!(color_distance(&red, &red).abs() < 1e-9);
        assert!(color_distance(&red, &to_lab(BLUE)) > 32.0);
        assert!(to_lab([255, 255, 255]).l > 99.0);
    }

    #[test]
    fn test_sample_skips_dark_lines() {
        // 10x10 cell: red with a black border one pixel wide
        let img = RgbImage::from_fn(10, 10, |x, y| {
            if x == 0 || y == 0 || x == 9 || y == 9 { Rgb([0, 0, 0]) } else { Rgb(RED) }
        });
        assert_eq!(sample_cell_color(&img, 0, 0, 1, 1, 5), Some(RED));

        let black = RgbImage::new(10, 10);
        assert_eq!(sample_cell_color(&black, 0, 0, 1, 1, 5), None);
    }

    #[test]
    fn test_fills_empty_cells() {
        let payload = painted(&[&[RED, BLUE], &[BLUE, RED]]);
        let current = GridAnalysisResult::from_cells(2, 2, 1, vec![GridAnalysisCell::new(0, 0, "A1")]);

        let result = fill_missing_cells_by_color(
            &payload,
            current,
            &codes(&["A1", "B2"]),
            &make_quantities(&[("A1", 2), ("B2", 2)]),
            &make_map(&[("A1", "#DC1E1E"), ("B2", "#1E1EDC")]),
            &FillConfig::default(),
        );

        // max fill is round(4 * 0.35) = 1 and every empty cell matches
        // exactly, so row order decides
        assert_eq!(result.filled_count, 2);
        assert_eq!(result.ocr_count, 1);
        assert_eq!(result.cells[1], GridAnalysisCell::new(0, 1, "B2"));
    }

    #[test]
    fn test_swapping_hex_swaps_choice() {
        let payload = painted(&[&[RED]]);
        let config = FillConfig::default();
        let quantities = make_quantities(&[("A1", 1), ("B2", 1)]);

        let result = fill_missing_cells_by_color(
            &payload,
            GridAnalysisResult::empty(1, 1),
            &codes(&["A1", "B2"]),
            &quantities,
            &make_map(&[("A1", "#DC1E1E"), ("B2", "#1E1EDC")]),
            &config,
        );
        assert_eq!(result.cells[0].code, "A1");

        let result = fill_missing_cells_by_color(
            &payload,
            GridAnalysisResult::empty(1, 1),
            &codes(&["A1", "B2"]),
            &quantities,
            &make_map(&[("A1", "#1E1EDC"), ("B2", "#DC1E1E")]),
            &config,
        );
        assert_eq!(result.cells[0].code, "B2");
    }

    #[test]
    fn test_respects_remaining_quantity() {
        let payload = painted(&[&[RED, RED, RED]]);
        let current = GridAnalysisResult::from_cells(1, 3, 1, vec![GridAnalysisCell::new(0, 0, "A1")]);

        let result = fill_missing_cells_by_color(
            &payload,
            current,
            &codes(&["A1"]),
            &make_quantities(&[("A1", 1)]),
            &make_map(&[("A1", "#DC1E1E")]),
            &FillConfig::default(),
        );
        assert_eq!(result.filled_count, 1);
    }

    #[test]
    fn test_rejects_distant_colors() {
        let payload = painted(&[&[[240, 240, 240]]]);
        let result = fill_missing_cells_by_color(
            &payload,
            GridAnalysisResult::empty(1, 1),
            &codes(&["A1"]),
            &make_quantities(&[("A1", 1)]),
            &make_map(&[("A1", "#1E1EDC")]),
            &FillConfig::default(),
        );
        assert!(result.cells.is_empty());
        assert_eq!(result.filled_count, 0);
    }

    #[test]
    fn test_ignores_unparsable_hex() {
        let payload = painted(&[&[RED]]);
        let result = fill_missing_cells_by_color(
            &payload,
            GridAnalysisResult::empty(1, 1),
            &codes(&["A1"]),
            &make_quantities(&[("A1", 1)]),
            &make_map(&[("A1", "red")]),
            &FillConfig::default(),
        );
        assert!(result.cells.is_empty());
    }
}
