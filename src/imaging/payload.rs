//! Base64 image payload handling.
//!
//! Clients send images in several shapes: bare base64, `data:` URIs,
//! URL-safe or percent-encoded base64, and occasionally a whole serialized
//! request object with the image in an `imageBase64=` field. Everything here
//! turns those into decoded pixels, and back into base64 for the OCR provider.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Accepts payloads with or without trailing `=` padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Field names that wrap the image when a serialized request is sent as the payload.
const WRAPPED_FIELDS: [&str; 2] = ["originalImageBase64=", "imageBase64="];

/// Strips a `data:` URI prefix or a wrapped request field, then sanitizes the
/// remaining base64 text.
pub fn strip_data_url_prefix(raw: &str) -> String {
    let mut trimmed = raw.trim();

    if !trimmed.starts_with("data:") {
        if let Some(inner) = WRAPPED_FIELDS
            .iter()
            .find_map(|key| extract_wrapped_field(trimmed, key))
        {
            trimmed = inner;
        }
    }

    if trimmed.starts_with("data:") {
        if let Some(comma) = trimmed.find(',') {
            trimmed = &trimmed[comma + 1..];
        }
    }
    sanitize_base64(trimmed)
}

/// Pulls the value of `key` out of a `{key=value, ...}` style dump.
fn extract_wrapped_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    let rest = &text[start..];
    let end = rest
        .find(", ")
        .or_else(|| rest.rfind('}'))
        .filter(|&e| e > 0)
        .unwrap_or(rest.len());
    let mut value = rest[..end].trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            value = &value[1..value.len() - 1];
        }
    }
    if value.is_empty() { None } else { Some(value) }
}

/// Undoes percent-encoding and URL-safe alphabet substitution and drops whitespace.
pub fn sanitize_base64(payload: &str) -> String {
    let mut cleaned = payload.trim().to_string();
    let lower = cleaned.to_ascii_lowercase();
    if lower.contains("%2b") || lower.contains("%2f") || lower.contains("%3d") {
        cleaned = percent_decode(&cleaned);
    }
    cleaned
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}

/// Form-style percent decoding: `%XX` escapes and `+` as space.
/// Malformed escapes are kept literally.
fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(value) => {
                        out.push(value);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decodes sanitized base64 text into bytes.
///
/// Falls back to dropping every character outside the base64 alphabet, the
/// way MIME decoders do, before giving up.
pub fn decode_base64(payload: &str) -> Option<Vec<u8>> {
    let sanitized = sanitize_base64(payload);
    if sanitized.is_empty() {
        return None;
    }
    if let Ok(bytes) = LENIENT.decode(&sanitized) {
        return Some(bytes);
    }
    let filtered: String = sanitized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();
    let unpadded = filtered.trim_end_matches('=');
    LENIENT.decode(unpadded).ok().filter(|b| !b.is_empty())
}

/// Decodes a base64 payload into an RGB image. Returns `None` when the
/// payload is not base64 or not a readable image.
pub fn decode_image(payload: &str) -> Option<RgbImage> {
    let bytes = decode_base64(payload)?;
    image::load_from_memory(&bytes).ok().map(|img| img.to_rgb8())
}

/// Encodes an image as base64 in the given container format.
pub fn encode_image(img: &DynamicImage, format: ImageFormat) -> Option<String> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format).ok()?;
    Some(STANDARD.encode(buffer.into_inner()))
}

pub fn encode_png(img: &DynamicImage) -> Option<String> {
    encode_image(img, ImageFormat::Png)
}

pub fn encode_jpeg(img: &DynamicImage) -> Option<String> {
    encode_image(img, ImageFormat::Jpeg)
}

/// Re-encodes a payload as a plain RGB PNG so every provider call sees the
/// same format. Undecodable payloads are returned sanitized but untouched.
pub fn normalize_for_ocr(payload: &str) -> String {
    let sanitized = sanitize_base64(payload);
    match decode_image(&sanitized) {
        Some(rgb) => encode_png(&DynamicImage::ImageRgb8(rgb)).unwrap_or(sanitized),
        None => {
            crate::log(&format!(
                "normalize-image: decode failed, keeping sanitized payload (len={})",
                sanitized.len()
            ));
            sanitized
        }
    }
}

/// Guesses the container format from magic bytes.
pub fn detect_format(bytes: &[u8]) -> &'static str {
    if bytes.len() < 12 {
        return "unknown";
    }
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "png",
        [0xFF, 0xD8, ..] => "jpeg",
        [b'G', b'I', b'F', ..] => "gif",
        [b'B', b'M', ..] => "bmp",
        _ if &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" => "webp",
        _ => "unknown",
    }
}

/// One-line description of a payload for logs and debug output.
pub fn diagnose_payload(payload: &str) -> String {
    let sanitized = sanitize_base64(payload);
    if sanitized.is_empty() {
        return "base64 empty".to_string();
    }
    let head: String = sanitized.chars().take(24).collect();
    let Some(bytes) = decode_base64(&sanitized) else {
        return format!("len={}, head={}, decode=failed", sanitized.len(), head);
    };
    let format = detect_format(&bytes);
    match image::load_from_memory(&bytes) {
        Ok(img) => format!(
            "len={}, head={}, format={}, size={}x{}",
            sanitized.len(),
            head,
            format,
            img.width(),
            img.height()
        ),
        Err(e) => format!(
            "len={}, head={}, format={}, image unreadable: {}",
            sanitized.len(),
            head,
            format,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample_png() -> String {
        let img = RgbImage::from_fn(4, 3, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 7]));
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    #[test]
    fn test_strip_data_url_prefix() {
        let png = sample_png();
        let uri = format!("data:image/png;base64,{}", png);
        assert_eq!(strip_data_url_prefix(&uri), png);
    }

    #[test]
    fn test_strip_wrapped_field() {
        let png = sample_png();
        let wrapped = format!("{{rows=5, imageBase64={}, cols=5}}", png);
        assert_eq!(strip_data_url_prefix(&wrapped), png);

        let last = format!("{{rows=5, originalImageBase64=\"{}\"}}", png);
        assert_eq!(strip_data_url_prefix(&last), png);
    }

    #[test]
    fn test_sanitize_url_safe_and_whitespace() {
        assert_eq!(sanitize_base64(" ab-_\ncd \t"), "ab+/cd");
    }

    #[test]
    fn test_sanitize_percent_encoded() {
        assert_eq!(sanitize_base64("ab%2Bcd%2F%3D%3D"), "ab+cd/==");
        assert_eq!(sanitize_base64("ab%2bc%zz"), "ab+c%zz");
    }

    #[test]
    fn test_decode_without_padding() {
        assert_eq!(decode_base64("aGk"), Some(b"hi".to_vec()));
        assert_eq!(decode_base64("aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_base64(""), None);
    }

    #[test]
    fn test_decode_image_roundtrip_dimensions() {
        let decoded = decode_image(&sample_png()).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(3, 2), &Rgb([30, 40, 7]));
    }

    #[test]
    fn test_decode_image_garbage_is_none() {
        assert!(decode_image("bm90IGFuIGltYWdl").is_none());
        assert!(decode_image("!!!").is_none());
    }

    #[test]
    fn test_detect_format() {
        let png = decode_base64(&sample_png()).unwrap();
        assert_eq!(detect_format(&png), "png");
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.resize(16, 0);
        assert_eq!(detect_format(&jpeg), "jpeg");
        let mut webp = b"RIFF\0\0\0\0WEBP".to_vec();
        webp.resize(16, 0);
        assert_eq!(detect_format(&webp), "webp");
        assert_eq!(detect_format(b"short"), "unknown");
    }

    #[test]
    fn test_diagnose_payload() {
        assert!(diagnose_payload(&sample_png()).contains("format=png, size=4x3"));
        assert_eq!(diagnose_payload("   "), "base64 empty");
    }

    #[test]
    fn test_normalize_for_ocr_keeps_undecodable() {
        assert_eq!(normalize_for_ocr("aGk-"), "aGk+");
    }
}
