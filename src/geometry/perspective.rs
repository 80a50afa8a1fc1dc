//! Perspective correction of photographed patterns.
//!
//! The outer edge of the printed pattern is found from the first and last
//! ink pixel of every row and column, each side is fitted with a
//! least-squares line, and the quadrilateral formed by the four lines is
//! warped back to a rectangle.

use image::{GrayImage, ImageBuffer, Rgb, RgbImage};

use super::homography::{homography_from_quad, Point};
use crate::imaging::binarize_otsu;

/// Images smaller than this on either side are left alone.
const MIN_IMAGE_SIDE: u32 = 40;
/// Edge points required on each side before a fit is attempted.
const MIN_EDGE_POINTS: usize = 20;
/// Corners may fall outside the image by this share of its size.
const BOUNDS_MARGIN: f64 = 0.08;
/// The detected quadrilateral must cover at least this share of the image.
const MIN_AREA_RATIO: f64 = 0.45;
/// Opposite sides may differ in length by at most this factor.
const MAX_SIDE_RATIO: f64 = 2.0;
/// Smallest rectified side in pixels.
const MIN_TARGET_SIDE: u32 = 20;
/// Binary pixels at or below this value count as ink.
pub(crate) const INK_LEVEL: u8 = 110;

/// Outcome of a correction attempt.
#[derive(Clone, Debug)]
pub struct Correction {
    pub image: RgbImage,
    pub corrected: bool,
}

/// A line `a*x + b*y + c = 0`.
#[derive(Clone, Copy, Debug)]
struct Line {
    a: f64,
    b: f64,
    c: f64,
}

/// Corners in clockwise order starting top-left.
#[derive(Clone, Copy, Debug)]
pub struct Quad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl Quad {
    fn corners(&self) -> [Point; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }

    /// Shoelace area.
    fn area(&self) -> f64 {
        let pts = self.corners();
        let mut sum = 0.0;
        for i in 0..pts.len() {
            let (cur, next) = (pts[i], pts[(i + 1) % pts.len()]);
            sum += cur.x * next.y - next.x * cur.y;
        }
        sum.abs() * 0.5
    }
}

/// Rectifies `img` when a plausible outer quadrilateral is found; otherwise
/// hands back the input unchanged with `corrected == false`.
pub fn correct_perspective(img: &RgbImage) -> Correction {
    let unchanged = || Correction {
        image: img.clone(),
        corrected: false,
    };

    if img.width() < MIN_IMAGE_SIDE || img.height() < MIN_IMAGE_SIDE {
        return unchanged();
    }

    let binary = binarize_otsu(img);
    let Some(quad) = detect_outer_quad(&binary) else {
        return unchanged();
    };

    match warp_perspective(img, &quad) {
        Some(image) => Correction {
            image,
            corrected: true,
        },
        None => unchanged(),
    }
}

/// Finds the pattern's outer quadrilateral in a binary image.
pub fn detect_outer_quad(binary: &GrayImage) -> Option<Quad> {
    let (width, height) = binary.dimensions();
    let is_ink = |x: u32, y: u32| binary.get_pixel(x, y)[0] <= INK_LEVEL;

    let mut left = Vec::new();
    let mut right = Vec::new();
    for y in 0..height {
        if let Some(x) = (0..width).find(|&x| is_ink(x, y)) {
            left.push(Point::new(x as f64, y as f64));
        }
        if let Some(x) = (0..width).rev().find(|&x| is_ink(x, y)) {
            right.push(Point::new(x as f64, y as f64));
        }
    }

    let mut top = Vec::new();
    let mut bottom = Vec::new();
    for x in 0..width {
        if let Some(y) = (0..height).find(|&y| is_ink(x, y)) {
            top.push(Point::new(x as f64, y as f64));
        }
        if let Some(y) = (0..height).rev().find(|&y| is_ink(x, y)) {
            bottom.push(Point::new(x as f64, y as f64));
        }
    }

    if [&left, &right, &top, &bottom].iter().any(|side| side.len() < MIN_EDGE_POINTS) {
        return None;
    }

    let left_line = fit_x_of_y(&left)?;
    let right_line = fit_x_of_y(&right)?;
    let top_line = fit_y_of_x(&top)?;
    let bottom_line = fit_y_of_x(&bottom)?;

    let quad = Quad {
        top_left: intersect(left_line, top_line)?,
        top_right: intersect(right_line, top_line)?,
        bottom_right: intersect(right_line, bottom_line)?,
        bottom_left: intersect(left_line, bottom_line)?,
    };

    if !quad.corners().iter().all(|p| within_extended_bounds(p, width, height)) {
        return None;
    }
    if quad.area() < width as f64 * height as f64 * MIN_AREA_RATIO {
        return None;
    }

    let top_width = quad.top_left.distance(&quad.top_right);
    let bottom_width = quad.bottom_left.distance(&quad.bottom_right);
    let left_height = quad.top_left.distance(&quad.bottom_left);
    let right_height = quad.top_right.distance(&quad.bottom_right);
    if !side_ratio_ok(top_width, bottom_width) || !side_ratio_ok(left_height, right_height) {
        return None;
    }

    Some(quad)
}

fn side_ratio_ok(a: f64, b: f64) -> bool {
    if a <= 1e-6 || b <= 1e-6 {
        return false;
    }
    a.max(b) / a.min(b) <= MAX_SIDE_RATIO
}

fn within_extended_bounds(p: &Point, width: u32, height: u32) -> bool {
    let margin_x = width as f64 * BOUNDS_MARGIN;
    let margin_y = height as f64 * BOUNDS_MARGIN;
    p.x >= -margin_x
        && p.x <= width as f64 - 1.0 + margin_x
        && p.y >= -margin_y
        && p.y <= height as f64 - 1.0 + margin_y
}

/// Least-squares `x = slope * y + intercept`, as `x - slope*y - intercept = 0`.
fn fit_x_of_y(points: &[Point]) -> Option<Line> {
    let (slope, intercept) = regress(points.iter().map(|p| (p.y, p.x)))?;
    Some(Line {
        a: 1.0,
        b: -slope,
        c: -intercept,
    })
}

/// Least-squares `y = slope * x + intercept`, as `slope*x - y + intercept = 0`.
fn fit_y_of_x(points: &[Point]) -> Option<Line> {
    let (slope, intercept) = regress(points.iter().map(|p| (p.x, p.y)))?;
    Some(Line {
        a: slope,
        b: -1.0,
        c: intercept,
    })
}

/// Ordinary least squares of `dep` on `indep`. `None` when `indep` has no spread.
fn regress(samples: impl Iterator<Item = (f64, f64)> + Clone) -> Option<(f64, f64)> {
    let n = samples.clone().count();
    if n < 2 {
        return None;
    }
    let (sum_i, sum_d) = samples.clone().fold((0.0, 0.0), |(si, sd), (i, d)| (si + i, sd + d));
    let mean_i = sum_i / n as f64;
    let mean_d = sum_d / n as f64;

    let (num, den) = samples.fold((0.0, 0.0), |(num, den), (i, d)| {
        let di = i - mean_i;
        (num + di * (d - mean_d), den + di * di)
    });
    if den.abs() < 1e-6 {
        return None;
    }
    let slope = num / den;
    Some((slope, mean_d - slope * mean_i))
}

fn intersect(first: Line, second: Line) -> Option<Point> {
    let det = first.a * second.b - second.a * first.b;
    if det.abs() < 1e-8 {
        return None;
    }
    let x = (first.b * second.c - second.b * first.c) / det;
    let y = (second.a * first.c - first.a * second.c) / det;
    Some(Point::new(x, y))
}

/// Resamples the quadrilateral into an axis-aligned rectangle whose sides are
/// the averaged opposite edge lengths.
fn warp_perspective(source: &RgbImage, quad: &Quad) -> Option<RgbImage> {
    let top_width = quad.top_left.distance(&quad.top_right);
    let bottom_width = quad.bottom_left.distance(&quad.bottom_right);
    let left_height = quad.top_left.distance(&quad.bottom_left);
    let right_height = quad.top_right.distance(&quad.bottom_right);

    let target_width = (((top_width + bottom_width) / 2.0).round() as u32).max(MIN_TARGET_SIDE);
    let target_height = (((left_height + right_height) / 2.0).round() as u32).max(MIN_TARGET_SIDE);

    let tw = target_width as f64 - 1.0;
    let th = target_height as f64 - 1.0;
    let rect = [
        Point::new(0.0, 0.0),
        Point::new(tw, 0.0),
        Point::new(tw, th),
        Point::new(0.0, th),
    ];
    // Destination pixels are pulled from the source, so map rect -> quad.
    let h = homography_from_quad(&rect, &quad.corners())?;

    Some(ImageBuffer::from_fn(target_width, target_height, |x, y| {
        let mapped = h
            .apply(Point::new(x as f64, y as f64))
            .unwrap_or(Point::new(-1.0, -1.0));
        sample_bilinear(source, mapped.x, mapped.y)
    }))
}

/// Bilinear sample; coordinates outside the interpolable range snap to the
/// nearest pixel.
pub fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let max_x = width as f64 - 1.0;
    let max_y = height as f64 - 1.0;

    if x < 0.0 || y < 0.0 || x >= max_x || y >= max_y {
        let cx = x.round().clamp(0.0, max_x) as u32;
        let cy = y.round().clamp(0.0, max_y) as u32;
        return *img.get_pixel(cx, cy);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let dx = x - x0 as f64;
    let dy = y - y0 as f64;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x0 + 1, y0);
    let p01 = img.get_pixel(x0, y0 + 1);
    let p11 = img.get_pixel(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - dx) + p10[c] as f64 * dx;
        let bottom = p01[c] as f64 * (1.0 - dx) + p11[c] as f64 * dx;
        *value = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    /// White canvas with a filled black rectangle `[x0, x1] x [y0, y1]`.
    fn canvas_with_rect(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> RgbImage {
        ImageBuffer::from_fn(w, h, |x, y| {
            if (x0..=x1).contains(&x) && (y0..=y1).contains(&y) { BLACK } else { WHITE }
        })
    }

    #[test]
    fn test_small_image_untouched() {
        let img = canvas_with_rect(30, 30, 2, 2, 27, 27);
        let result = correct_perspective(&img);
        assert!(!result.corrected);
        assert_eq!(result.image.dimensions(), (30, 30));
    }

    #[test]
    fn test_blank_image_untouched() {
        let img = RgbImage::from_pixel(100, 100, WHITE);
        assert!(!correct_perspective(&img).corrected);
    }

    #[test]
    fn test_small_quad_rejected_by_area() {
        let img = canvas_with_rect(100, 100, 30, 30, 69, 69);
        assert!(!correct_perspective(&img).corrected);
    }

    #[test]
    fn test_axis_aligned_rect_is_cropped() {
        let img = canvas_with_rect(100, 100, 10, 10, 89, 89);
        let binary = binarize_otsu(&img);
        let quad = detect_outer_quad(&binary).unwrap();
        assert!((quad.top_left.x - 10.0).abs() < 1e-6 && (quad.top_left.y - 10.0).abs() < 1e-6);
        assert!((quad.bottom_right.x - 89.0).abs() < 1e-6 && (quad.bottom_right.y - 89.0).abs() < 1e-6);

        let result = correct_perspective(&img);
        assert!(result.corrected);
        assert_eq!(result.image.dimensions(), (79, 79));
        assert_eq!(*result.image.get_pixel(40, 40), BLACK);
    }

    #[test]
    fn test_skewed_quad_detected() {
        // Parallelogram leaning right: left edge x = 10 + y/20.
        let img: RgbImage = ImageBuffer::from_fn(120, 100, |x, y| {
            let left = 10 + y / 20;
            if (5..95).contains(&y) && x >= left && x <= left + 90 { BLACK } else { WHITE }
        });
        let binary = binarize_otsu(&img);
        let quad = detect_outer_quad(&binary).unwrap();
        assert!(quad.bottom_left.x > quad.top_left.x);
        assert!(correct_perspective(&img).corrected);
    }

    #[test]
    fn test_sample_bilinear() {
        let img: RgbImage = ImageBuffer::from_fn(2, 2, |x, _| if x == 0 { BLACK } else { WHITE });
        assert_eq!(sample_bilinear(&img, 0.5, 0.0)[0], 128);
        assert_eq!(sample_bilinear(&img, -3.0, 0.2), BLACK);
        assert_eq!(sample_bilinear(&img, 7.0, 9.0), WHITE);
    }
}
