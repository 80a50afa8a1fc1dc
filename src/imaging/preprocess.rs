use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};

use super::payload::{decode_image, encode_jpeg, encode_png};
use crate::model::CropRect;

/// Contrast factor of the enhanced OCR variant.
const VARIANT_CONTRAST: f64 = 1.45;
/// Upscale factor applied to every derived OCR variant.
const VARIANT_SCALE: u32 = 2;

/// Luminance of an RGB triple, `0.299 r + 0.587 g + 0.114 b`.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let lum = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
    lum.round().clamp(0.0, 255.0) as u8
}

/// Converts an RGB image to a luminance-only buffer.
pub fn to_grayscale(img: &RgbImage) -> GrayImage {
    let (width, height) = img.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let p = img.get_pixel(x, y);
        Luma([luminance(p[0], p[1], p[2])])
    })
}

/// Computes the Otsu threshold: the level that maximizes between-class
/// variance over the 256-bin histogram.
///
/// A single-valued image has no split and keeps the neutral threshold 128.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0u64;
    let mut max_variance = -1.0;
    let mut threshold = 128u8;

    for (level, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += level as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum - sum_background) / weight_foreground as f64;
        let variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if variance > max_variance {
            max_variance = variance;
            threshold = level as u8;
        }
    }

    threshold
}

/// Converts a grayscale image to black ink (0) on white (255).
///
/// With `dark_text` the pixels at or below `threshold` are ink; otherwise the
/// pixels at or above it are.
pub fn binarize(gray: &GrayImage, threshold: u8, dark_text: bool) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut output = ImageBuffer::new(width, height);

    for (x, y, pixel) in gray.enumerate_pixels() {
        let lum = pixel[0];
        let ink = if dark_text { lum <= threshold } else { lum >= threshold };
        output.put_pixel(x, y, Luma([if ink { 0u8 } else { 255u8 }]));
    }

    output
}

/// Binarizes an RGB image with its own Otsu threshold, dark text on light paper.
pub fn binarize_otsu(img: &RgbImage) -> GrayImage {
    let gray = to_grayscale(img);
    let threshold = otsu_threshold(&gray);
    binarize(&gray, threshold, true)
}

/// Stretches contrast around mid-gray: `(lum - 128) * factor + 128`, clamped.
pub fn apply_contrast(gray: &GrayImage, factor: f64) -> GrayImage {
    let (width, height) = gray.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let lum = gray.get_pixel(x, y)[0] as f64;
        let enhanced = ((lum - 128.0) * factor + 128.0).round();
        Luma([enhanced.clamp(0.0, 255.0) as u8])
    })
}

/// Resizes by `factor` (at least 1 px per side). `FilterType::Triangle` is
/// bilinear, `FilterType::Nearest` nearest-neighbour.
pub fn scale_image(img: &DynamicImage, factor: f64, filter: FilterType) -> DynamicImage {
    let width = ((img.width() as f64 * factor).round() as u32).max(1);
    let height = ((img.height() as f64 * factor).round() as u32).max(1);
    img.resize_exact(width, height, filter)
}

/// Crops the part of a pixel rectangle that overlaps the image.
///
/// Fails when the rectangle has a non-positive width or height, or does not
/// overlap the image at all.
pub fn crop_rect(img: &RgbImage, rect: &CropRect) -> Option<RgbImage> {
    let (w, h) = img.dimensions();
    if rect.width <= 0 || rect.height <= 0 {
        return None;
    }

    let sx = rect.x.max(0);
    let sy = rect.y.max(0);
    let ex = rect.x.saturating_add(rect.width).min(w as i64);
    let ey = rect.y.saturating_add(rect.height).min(h as i64);
    if ex <= sx || ey <= sy {
        return None;
    }

    Some(
        image::imageops::crop_imm(img, sx as u32, sy as u32, (ex - sx) as u32, (ey - sy) as u32)
            .to_image(),
    )
}

/// One rendering of a payload submitted to OCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrVariant {
    pub base64: String,
    /// Size of this rendering relative to the source, 1 for the original
    pub scale: u32,
}

/// Builds the OCR variants of a payload: the original first, then an
/// enhanced-contrast, a dark-text binary and a light-text binary rendering,
/// each upscaled and encoded both as PNG and JPEG. Duplicates are dropped.
///
/// An undecodable payload yields just the original.
pub fn build_ocr_variants(payload: &str) -> Vec<OcrVariant> {
    let mut variants = vec![OcrVariant {
        base64: payload.to_string(),
        scale: 1,
    }];
    let Some(rgb) = decode_image(payload) else {
        return variants;
    };

    let gray = to_grayscale(&rgb);
    let threshold = otsu_threshold(&gray);
    let renderings = [
        apply_contrast(&gray, VARIANT_CONTRAST),
        binarize(&gray, threshold, true),
        binarize(&gray, threshold, false),
    ];

    for rendering in renderings {
        let scaled = scale_image(
            &DynamicImage::ImageLuma8(rendering),
            VARIANT_SCALE as f64,
            FilterType::Triangle,
        );
        for encoded in [encode_png(&scaled), encode_jpeg(&scaled)].into_iter().flatten() {
            if variants.iter().all(|v| v.base64 != encoded) {
                variants.push(OcrVariant {
                    base64: encoded,
                    scale: VARIANT_SCALE,
                });
            }
        }
    }

    variants
}
