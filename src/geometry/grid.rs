//! Grid boundary resolution.
//!
//! Hand-photographed patterns rarely have perfectly even cells. The ink
//! projection of a binarized image peaks on grid lines, so each expected
//! boundary is pulled towards the darkest nearby position, within limits.
//! When the result strays too far from an even grid, the even grid wins.

use image::{GrayImage, RgbImage};

use super::perspective::INK_LEVEL;
use crate::error::{Result, ScanError};
use crate::imaging::binarize_otsu;

/// Cost per pixel of moving a boundary away from its uniform position.
const DISTANCE_PENALTY: f64 = 0.6;

/// Column and row cut positions of a `rows x cols` grid.
///
/// `x_boundaries` has `cols + 1` entries, `y_boundaries` has `rows + 1`;
/// both start at 0, end at size - 1 and strictly increase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridGeometry {
    pub width: u32,
    pub height: u32,
    pub x_boundaries: Vec<u32>,
    pub y_boundaries: Vec<u32>,
}

impl GridGeometry {
    /// Evenly spaced boundaries over a `width x height` image (each at least 1).
    pub fn uniform(rows: usize, cols: usize, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            x_boundaries: uniform_boundaries(cols.max(1), width),
            y_boundaries: uniform_boundaries(rows.max(1), height),
        }
    }

    pub fn rows(&self) -> usize {
        self.y_boundaries.len().saturating_sub(1)
    }

    pub fn cols(&self) -> usize {
        self.x_boundaries.len().saturating_sub(1)
    }

    /// Cell containing the point, or `None` when it lies outside the grid.
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = locate_index(&self.x_boundaries, x)?;
        let row = locate_index(&self.y_boundaries, y)?;
        Some((row, col))
    }

    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let cx = (self.x_boundaries[col] as f64 + self.x_boundaries[col + 1] as f64) / 2.0;
        let cy = (self.y_boundaries[row] as f64 + self.y_boundaries[row + 1] as f64) / 2.0;
        (cx, cy)
    }

    /// Returns `self` if it describes a valid `rows x cols` grid, otherwise
    /// a uniform grid of the same image size.
    pub fn sanitize(self, rows: usize, cols: usize) -> Self {
        let shaped = self.x_boundaries.len() == cols + 1 && self.y_boundaries.len() == rows + 1;
        if shaped
            && boundaries_valid(&self.x_boundaries, self.width.max(1))
            && boundaries_valid(&self.y_boundaries, self.height.max(1))
        {
            self
        } else {
            GridGeometry::uniform(rows, cols, self.width, self.height)
        }
    }
}

/// `segments + 1` cut positions: `round(i * (size - 1) / segments)`.
fn uniform_boundaries(segments: usize, size: u32) -> Vec<u32> {
    let span = size.max(1) as f64 - 1.0;
    (0..=segments)
        .map(|i| (i as f64 * span / segments as f64).round() as u32)
        .collect()
}

/// Detects grid lines in `img`. Fails when the ink projection does not
/// support a grid close to uniform; callers fall back to
/// [`GridGeometry::uniform`].
pub fn detect_grid_geometry(img: &RgbImage, rows: usize, cols: usize) -> Result<GridGeometry> {
    if rows == 0 || cols == 0 {
        return Err(ScanError::GeometryUnavailable("empty grid".to_string()));
    }
    let (width, height) = img.dimensions();
    let binary = binarize_otsu(img);

    let x_boundaries = detect_boundaries(&binary, cols + 1, Axis::Columns)
        .ok_or_else(|| ScanError::GeometryUnavailable(format!("image too narrow ({} px)", width)))?;
    let y_boundaries = detect_boundaries(&binary, rows + 1, Axis::Rows)
        .ok_or_else(|| ScanError::GeometryUnavailable(format!("image too short ({} px)", height)))?;

    if !boundaries_valid(&x_boundaries, width) || !boundaries_valid(&y_boundaries, height) {
        return Err(ScanError::GeometryUnavailable("boundaries collapsed".to_string()));
    }
    if !close_to_uniform(&x_boundaries, width) || !close_to_uniform(&y_boundaries, height) {
        return Err(ScanError::GeometryUnavailable(
            "boundaries stray too far from an even grid".to_string(),
        ));
    }

    Ok(GridGeometry {
        width,
        height,
        x_boundaries,
        y_boundaries,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Axis {
    /// Boundaries along x (vertical grid lines)
    Columns,
    /// Boundaries along y (horizontal grid lines)
    Rows,
}

/// Greedy boundary search over the smoothed ink projection of one axis.
fn detect_boundaries(binary: &GrayImage, count: usize, axis: Axis) -> Option<Vec<u32>> {
    let (width, height) = binary.dimensions();
    let (length, orthogonal) = match axis {
        Axis::Columns => (width as usize, height),
        Axis::Rows => (height as usize, width),
    };
    // every boundary needs its own pixel
    if count <= 1 || length <= 2 || count > length {
        return None;
    }

    let projection: Vec<f64> = (0..length as u32)
        .map(|primary| {
            (0..orthogonal)
                .filter(|&secondary| {
                    let (x, y) = match axis {
                        Axis::Columns => (primary, secondary),
                        Axis::Rows => (secondary, primary),
                    };
                    binary.get_pixel(x, y)[0] <= INK_LEVEL
                })
                .count() as f64
        })
        .collect();

    let radius = (length / (count * 2).max(16)).max(2);
    let smooth = smooth_array(&projection, radius);

    let mut boundaries = vec![0usize; count];
    boundaries[count - 1] = length - 1;
    let window = (length / (count * 3).max(10)).max(4);

    for i in 1..count - 1 {
        let expected = (i as f64 * (length as f64 - 1.0) / (count as f64 - 1.0)).round() as usize;
        let start = (boundaries[i - 1] + 1).max(expected.saturating_sub(window));
        let end = (length - (count - i)).min(expected + window);

        let mut best_index = expected;
        let mut best_score = f64::NEG_INFINITY;
        for p in start..=end {
            let score = smooth[p] - p.abs_diff(expected) as f64 * DISTANCE_PENALTY;
            if score > best_score {
                best_score = score;
                best_index = p;
            }
        }
        boundaries[i] = best_index;
    }

    for i in 1..count {
        if boundaries[i] <= boundaries[i - 1] {
            boundaries[i] = (length - (count - i)).min(boundaries[i - 1] + 1);
        }
    }

    Some(boundaries.into_iter().map(|b| b as u32).collect())
}

/// Centered moving average of radius `radius`, clamped at the ends.
///
/// The first `radius` entries use a running mean of everything seen so far.
pub fn smooth_array(values: &[f64], radius: usize) -> Vec<f64> {
    let mut smooth = vec![0.0; values.len()];
    let mut running = 0.0;

    for i in 0..values.len() {
        running += values[i];
        if i >= radius {
            let left = i - radius;
            let right = (i + radius).min(values.len() - 1);
            let sum: f64 = values[left..=right].iter().sum();
            smooth[i] = sum / (right - left + 1) as f64;
        } else {
            smooth[i] = running / (i + 1) as f64;
        }
    }
    smooth
}

/// First 0, last `size - 1`, and every gap at least `max(1, size / max(500, 20n))`.
pub fn boundaries_valid(boundaries: &[u32], size: u32) -> bool {
    if boundaries.len() < 2 || size <= 1 {
        return false;
    }
    if boundaries[0] != 0 || boundaries[boundaries.len() - 1] != size - 1 {
        return false;
    }
    let min_gap = (size / (boundaries.len() as u32 * 20).max(500)).max(1);
    boundaries
        .windows(2)
        .all(|pair| pair[1] > pair[0] && pair[1] - pair[0] >= min_gap)
}

/// Every interior boundary within `max(4, 0.55 step)` of its uniform
/// position, and the mean shift within `max(2.5, 0.22 step)`.
fn close_to_uniform(boundaries: &[u32], size: u32) -> bool {
    if boundaries.len() < 2 || size <= 1 {
        return false;
    }
    let segments = boundaries.len() - 1;
    let step = (size as f64 - 1.0) / segments as f64;
    let max_shift = (step * 0.55).max(4.0);

    let mut total_shift = 0.0;
    for (i, &b) in boundaries.iter().enumerate().take(segments).skip(1) {
        let shift = (b as f64 - i as f64 * step).abs();
        if shift > max_shift {
            return false;
        }
        total_shift += shift;
    }
    let average = total_shift / (boundaries.len().saturating_sub(2)).max(1) as f64;
    average <= (step * 0.22).max(2.5)
}

/// Index `i` with `b[i] <= value < b[i + 1]`. The upper edge of the last
/// cell belongs to it. Values outside `[b[0], b[n]]` have no cell.
pub fn locate_index(boundaries: &[u32], value: f64) -> Option<usize> {
    if boundaries.len() < 2 {
        return None;
    }
    let first = boundaries[0] as f64;
    let last = boundaries[boundaries.len() - 1] as f64;
    if !(first..=last).contains(&value) {
        return None;
    }
    // Number of boundaries at or below the value, minus one.
    let upper = boundaries.partition_point(|&b| b as f64 <= value);
    Some((upper - 1).min(boundaries.len() - 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    /// White image with 2 px black grid lines on an even `rows x cols` grid.
    fn ruled_grid(rows: u32, cols: u32, cell: u32) -> RgbImage {
        let w = cols * cell;
        let h = rows * cell;
        ImageBuffer::from_fn(w, h, |x, y| {
            let on_line = |v: u32, size: u32| v % cell < 2 || v >= size - 2;
            if on_line(x, w) || on_line(y, h) {
                Rgb([0, 0, 0])
            } else {
                Rgb([250, 250, 250])
            }
        })
    }

    fn assert_well_formed(boundaries: &[u32], size: u32, segments: usize) {
        assert_eq!(boundaries.len(), segments + 1);
        assert_eq!(boundaries[0], 0);
        assert_eq!(*boundaries.last().unwrap(), size - 1);
        assert!(boundaries.windows(2).all(|p| p[0] < p[1]), "not increasing: {:?}", boundaries);
    }

    #[test]
    fn test_uniform_boundaries() {
        let g = GridGeometry::uniform(2, 4, 101, 51);
        assert_eq!(g.x_boundaries, vec![0, 25, 50, 75, 100]);
        assert_eq!(g.y_boundaries, vec![0, 25, 50]);
        assert_eq!((g.rows(), g.cols()), (2, 4));
    }

    #[test]
    fn test_uniform_zero_size_clamped() {
        let g = GridGeometry::uniform(3, 3, 0, 0);
        assert_eq!((g.width, g.height), (1, 1));
        assert_eq!(g.x_boundaries, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_locate_index() {
        let b = [0, 10, 20, 30];
        assert_eq!(locate_index(&b, 0.0), Some(0));
        assert_eq!(locate_index(&b, 9.99), Some(0));
        assert_eq!(locate_index(&b, 10.0), Some(1));
        assert_eq!(locate_index(&b, 29.5), Some(2));
        assert_eq!(locate_index(&b, 30.0), Some(2));
        assert_eq!(locate_index(&b, -0.5), None);
        assert_eq!(locate_index(&b, 30.5), None);
    }

    #[test]
    fn test_cell_center_and_locate() {
        let g = GridGeometry::uniform(5, 5, 250, 250);
        let (cx, cy) = g.cell_center(0, 1);
        assert_eq!(g.locate(cx, cy), Some((0, 1)));
        assert_eq!(g.locate(260.0, 10.0), None);
    }

    #[test]
    fn test_smooth_array() {
        let values = [0.0, 0.0, 9.0, 0.0, 0.0, 0.0];
        let smooth = smooth_array(&values, 1);
        assert_eq!(smooth[0], 0.0);
        assert_eq!(smooth[1], 3.0);
        assert_eq!(smooth[2], 3.0);
        assert_eq!(smooth[3], 3.0);
        assert_eq!(smooth[5], 0.0);
    }

    #[test]
    fn test_boundaries_valid() {
        assert!(boundaries_valid(&[0, 50, 99], 100));
        assert!(!boundaries_valid(&[1, 50, 99], 100));
        assert!(!boundaries_valid(&[0, 50, 98], 100));
        assert!(!boundaries_valid(&[0, 50, 50, 99], 100));
        assert!(!boundaries_valid(&[0], 100));
    }

    #[test]
    fn test_close_to_uniform() {
        assert!(close_to_uniform(&[0, 33, 66, 99], 100));
        assert!(close_to_uniform(&[0, 38, 66, 99], 100));
        assert!(!close_to_uniform(&[0, 60, 66, 99], 100));
    }

    #[test]
    fn test_detect_ruled_grid() {
        let img = ruled_grid(4, 6, 30);
        let g = detect_grid_geometry(&img, 4, 6).unwrap();
        assert_well_formed(&g.x_boundaries, 180, 6);
        assert_well_formed(&g.y_boundaries, 120, 4);
        // Interior boundaries land on the drawn lines.
        for (i, &b) in g.x_boundaries.iter().enumerate().skip(1).take(5) {
            assert!(b.abs_diff(i as u32 * 30) <= 2, "x boundary {} at {}", i, b);
        }
    }

    #[test]
    fn test_detect_blank_image_is_uniform_like() {
        let img = RgbImage::from_pixel(100, 60, Rgb([255, 255, 255]));
        let g = detect_grid_geometry(&img, 3, 5).unwrap();
        assert_eq!(g, GridGeometry::uniform(3, 5, 100, 60));
    }

    #[test]
    fn test_detect_tiny_image_fails() {
        let img = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        assert!(matches!(
            detect_grid_geometry(&img, 2, 2),
            Err(ScanError::GeometryUnavailable(_))
        ));
    }

    #[test]
    fn test_detect_more_lines_than_pixels_fails() {
        let img = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        assert!(matches!(
            detect_grid_geometry(&img, 30, 30),
            Err(ScanError::GeometryUnavailable(_))
        ));
        // 21 column lines on 20 px
        assert!(detect_grid_geometry(&img, 2, 20).is_err());
    }

    #[test]
    fn test_sanitize_replaces_bad_geometry() {
        let bad = GridGeometry {
            width: 100,
            height: 100,
            x_boundaries: vec![0, 50, 99],
            y_boundaries: vec![0, 99],
        };
        let fixed = bad.clone().sanitize(2, 2);
        assert_eq!(fixed, GridGeometry::uniform(2, 2, 100, 100));

        let good = GridGeometry::uniform(2, 2, 100, 100);
        assert_eq!(good.clone().sanitize(2, 2), good);
    }
}
