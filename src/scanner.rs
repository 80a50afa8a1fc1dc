//! Request-level entry points: list extraction, its debug variant, and grid
//! analysis, with cropping and credential rotation around them.

use image::DynamicImage;

use crate::config::{KeyPair, ScanConfig};
use crate::error::{Result, ScanError};
use crate::grid::{
    analyze_grid_by_tiles, analyze_single_with_variants, extract_list_by_tiles,
    fill_missing_cells_by_color, grid_split_count, image_split_count, GridMapper,
};
use crate::imaging::{
    build_ocr_variants, crop_rect, decode_image, diagnose_payload, encode_png, normalize_for_ocr,
    strip_data_url_prefix,
};
use crate::model::{
    ColorRequirement, CropRect, DebugResult, ExtractionStrategy, GridAnalysisResult, GridRequest,
};
use crate::ocr::{
    choose_list, is_better, parse_by_location, parse_by_text, ListChoice, ListParse, OcrProvider,
    OcrSession, ServiceUsage, TokenMatcher,
};

/// Marker stored as raw text when a debug list was read tile by tile.
const TILED_RAW_TEXT: &str = "[tiled-ocr]";

/// A payload ready for OCR.
struct PreparedPayload {
    base64: String,
    /// Pixel size of the crop, when one was applied
    crop_size: Option<(u32, u32)>,
}

/// Strips and normalizes a payload, cropping it first when asked.
///
/// `Ok(None)` means the payload was empty. A crop that selects nothing, or
/// a payload that cannot be decoded for cropping, is `CropFailed`: the whole
/// image is never used in its place.
fn prepare_payload(raw: &str, crop: Option<&CropRect>) -> Result<Option<PreparedPayload>> {
    let stripped = strip_data_url_prefix(raw);
    let Some(rect) = crop else {
        if stripped.is_empty() {
            return Ok(None);
        }
        return Ok(Some(PreparedPayload {
            base64: normalize_for_ocr(&stripped),
            crop_size: None,
        }));
    };

    if stripped.is_empty() {
        return Err(ScanError::CropFailed("image payload is empty".to_string()));
    }
    let source = decode_image(&stripped).ok_or_else(|| {
        ScanError::CropFailed(format!("image not decodable: {}", diagnose_payload(&stripped)))
    })?;
    let cropped = crop_rect(&source, rect).ok_or_else(|| {
        ScanError::CropFailed(format!(
            "rect ({}, {}, {}, {}) selects nothing",
            rect.x, rect.y, rect.width, rect.height
        ))
    })?;
    let crop_size = cropped.dimensions();
    let base64 = encode_png(&DynamicImage::ImageRgb8(cropped))
        .ok_or_else(|| ScanError::CropFailed("re-encoding the crop failed".to_string()))?;
    crate::log(&format!(
        "crop: rect=({}, {}, {}, {}) -> {}x{}",
        rect.x, rect.y, rect.width, rect.height, crop_size.0, crop_size.1
    ));
    Ok(Some(PreparedPayload {
        base64,
        crop_size: Some(crop_size),
    }))
}

/// What a credential loop ended with.
enum Rotation<T> {
    Done(T),
    /// Every pair ran out of quota
    Exhausted(ScanError),
}

/// Runs `attempt` with each credential pair in turn. A quota error moves on
/// to the next pair; any other error is returned immediately.
fn rotate_keys<T>(keys: &[KeyPair], mut attempt: impl FnMut(&KeyPair) -> Result<T>) -> Result<Rotation<T>> {
    let mut last_quota = None;
    for (i, keys) in keys.iter().enumerate() {
        match attempt(keys) {
            Ok(value) => return Ok(Rotation::Done(value)),
            Err(e) if e.is_quota() => {
                crate::log(&format!("OCR quota reached on key pair {}: {}", i + 1, e));
                last_quota = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    match last_quota {
        Some(e) => Ok(Rotation::Exhausted(e)),
        None => Err(ScanError::Configuration("no credential pairs".to_string())),
    }
}

/// Entry point for every scan, generic over the OCR provider.
pub struct BeadScanner<P: OcrProvider> {
    provider: P,
    config: ScanConfig,
}

impl<P: OcrProvider> BeadScanner<P> {
    pub fn new(provider: P, config: ScanConfig) -> Self {
        Self { provider, config }
    }

    fn key_pairs(&self) -> Result<Vec<KeyPair>> {
        let keys = self.config.ocr.key_pairs();
        if keys.is_empty() {
            return Err(ScanError::Configuration(
                "set ocr.api_key / ocr.secret_key in config.json or BAIDU_OCR_AK / BAIDU_OCR_SK".to_string(),
            ));
        }
        Ok(keys)
    }

    /// Reads a color list from an image.
    ///
    /// Every OCR variant of the image is parsed both by location and by text
    /// and the best list of each kind is kept; the two are then compared by
    /// confidence. A failed or empty crop yields an empty list, as does
    /// running out of quota on every credential pair.
    pub fn extract_colors(&self, image_base64: &str, crop: Option<&CropRect>) -> Result<Vec<ColorRequirement>> {
        let prepared = match prepare_payload(image_base64, crop) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Ok(Vec::new()),
            Err(e @ ScanError::CropFailed(_)) => {
                crate::log(&format!("extract-colors: {}", e));
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let keys = self.key_pairs()?;
        let variants = build_ocr_variants(&prepared.base64);

        let mut usage = ServiceUsage::default();
        let outcome = rotate_keys(&keys, |keys| {
            let mut session = OcrSession::open(&self.provider, keys, &mut usage)?;
            self.best_list(&mut session, variants.iter().map(|v| v.base64.as_str()))
        })?;

        match outcome {
            Rotation::Done(colors) => {
                crate::log(&format!("extract-colors: {} colors via {}", colors.len(), usage.summary()));
                Ok(colors)
            }
            Rotation::Exhausted(e) => {
                crate::log(&format!("extract-colors: quota exhausted, returning an empty list: {}", e));
                Ok(Vec::new())
            }
        }
    }

    fn best_list<'v>(
        &self,
        session: &mut OcrSession<'_, P>,
        variants: impl Iterator<Item = &'v str>,
    ) -> Result<Vec<ColorRequirement>> {
        let weights = &self.config.scoring;
        let mut best_location: Vec<ColorRequirement> = Vec::new();
        let mut best_text: Vec<ColorRequirement> = Vec::new();

        for variant in variants {
            let mut tiled = None;
            match session.words_with_location(variant) {
                Ok(words) => {
                    let parsed = parse_by_location(&words).colors;
                    if is_better(&parsed, &best_location, weights) {
                        best_location = parsed;
                    }
                }
                Err(e) if e.is_image_size_or_format() => {
                    tiled = Some(extract_list_by_tiles(session, variant, &self.config.grid)?);
                }
                Err(e) if e.is_quota() => return Err(e),
                Err(e) => crate::log(&format!("location OCR failed, continuing with raw text: {}", e)),
            }

            if tiled.is_none() {
                match session.raw_text(variant) {
                    Ok(text) => {
                        let parsed = parse_by_text(&text).colors;
                        if is_better(&parsed, &best_text, weights) {
                            best_text = parsed;
                        }
                    }
                    Err(e) if e.is_image_size_or_format() => {
                        tiled = Some(extract_list_by_tiles(session, variant, &self.config.grid)?);
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(tiled) = tiled {
                if is_better(&tiled.by_location, &best_location, weights) {
                    best_location = tiled.by_location;
                }
                if is_better(&tiled.by_text, &best_text, weights) {
                    best_text = tiled.by_text;
                }
            }
        }

        Ok(match choose_list(&best_location, &best_text, weights) {
            ListChoice::Location => best_location,
            ListChoice::Text => best_text,
        })
    }

    /// Reads a color list from the image as-is and reports how it got there:
    /// the chosen strategy, grouped lines, pairing logs and raw text.
    pub fn extract_colors_debug(&self, image_base64: &str, crop: Option<&CropRect>) -> Result<DebugResult> {
        let mut usage = ServiceUsage::default();
        let prepared = match prepare_payload(image_base64, crop) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                let mut result = DebugResult::new(ExtractionStrategy::EmptyImage);
                result.ocr_service_summary = usage.summary();
                return Ok(result);
            }
            Err(e @ ScanError::CropFailed(_)) => {
                let mut result = DebugResult::new(ExtractionStrategy::CropFailed);
                result.ocr_service_summary = usage.summary();
                result.pair_logs = vec![
                    format!("{}; the whole image was not used in place of the selection", e),
                    format!("payload: {}", diagnose_payload(image_base64)),
                ];
                return Ok(result);
            }
            Err(e) => return Err(e),
        };
        let keys = self.key_pairs()?;

        let outcome = rotate_keys(&keys, |keys| {
            let mut session = OcrSession::open(&self.provider, keys, &mut usage)?;
            self.debug_list(&mut session, &prepared.base64)
        })?;

        let mut result = match outcome {
            Rotation::Done(result) => result,
            Rotation::Exhausted(e) => {
                let mut result = DebugResult::new(ExtractionStrategy::QuotaLimit);
                result.pair_logs = vec![format!(
                    "daily OCR quota used up on every key pair; switch keys or retry tomorrow ({})",
                    e
                )];
                result
            }
        };
        result.ocr_service_summary = usage.summary();
        Ok(result)
    }

    fn debug_list(&self, session: &mut OcrSession<'_, P>, base64: &str) -> Result<DebugResult> {
        let mut pair_logs = vec![format!("payload: {}", diagnose_payload(base64))];
        let mut location = ListParse::default();
        let mut location_error = None;
        let mut tiled_text = None;

        match session.words_with_location(base64) {
            Ok(words) => location = parse_by_location(&words),
            Err(e) if e.is_image_size_or_format() => {
                pair_logs.push("image exceeds OCR size or format limits, reading it in tiles".to_string());
                let tiled = extract_list_by_tiles(session, base64, &self.config.grid)?;
                pair_logs.extend(tiled.logs);
                location.colors = tiled.by_location;
                location.pairing = tiled.location_pairing;
                tiled_text = Some(ListParse {
                    colors: tiled.by_text,
                    pairing: tiled.text_pairing,
                    ..ListParse::default()
                });
            }
            Err(e) if e.is_quota() => return Err(e),
            Err(e) => location_error = Some(e),
        }
        pair_logs.append(&mut location.logs);

        let (raw_text, text) = match tiled_text {
            Some(text) => (TILED_RAW_TEXT.to_string(), text),
            None => match session.raw_text(base64) {
                Ok(raw) => {
                    let text = parse_by_text(&raw);
                    (raw, text)
                }
                Err(e) => return Err(location_error.unwrap_or(e)),
            },
        };
        if let Some(e) = location_error {
            pair_logs.push(format!("location OCR failed, fell back to text recognition: {}", e));
        }

        let use_text = !text.colors.is_empty()
            && choose_list(&location.colors, &text.colors, &self.config.scoring) == ListChoice::Text;
        let (strategy, colors) = if use_text {
            if !location.colors.is_empty() {
                pair_logs.push("location result looks like noise, switched to the text parse".to_string());
            }
            (ExtractionStrategy::Text(text.pairing.strategy()), text.colors)
        } else if !location.colors.is_empty() {
            (ExtractionStrategy::Location(location.pairing.strategy()), location.colors)
        } else {
            (ExtractionStrategy::Text(text.pairing.strategy()), text.colors)
        };

        let mut result = DebugResult::new(strategy);
        result.colors = colors;
        result.raw_text = raw_text;
        result.location_lines = location.lines;
        result.pair_logs = pair_logs;
        result.fallback_logs = text.logs;
        Ok(result)
    }

    /// Places the code of every grid cell.
    ///
    /// Large grids and large images are read in overlapping tiles. Cells OCR
    /// left empty are then filled by color when the request carries candidate
    /// quantities and hex colors. Running out of quota on every credential
    /// pair yields an empty result.
    pub fn analyze_grid(&self, request: &GridRequest) -> Result<GridAnalysisResult> {
        if request.rows <= 0 || request.cols <= 0 {
            return Err(ScanError::InvalidParameters(format!(
                "rows and cols must be positive, got {}x{}",
                request.rows, request.cols
            )));
        }
        let (rows, cols) = (request.rows as usize, request.cols as usize);

        let prepared = prepare_payload(&request.image_base64, request.crop.as_ref())?;
        let (width, height) = match prepared.as_ref().and_then(|p| p.crop_size) {
            Some((w, h)) => (w as i64, h as i64),
            None => (request.image_width, request.image_height),
        };
        if width <= 0 || height <= 0 {
            return Err(ScanError::InvalidParameters(format!(
                "image size must be positive, got {}x{}",
                width, height
            )));
        }

        let mut usage = ServiceUsage::default();
        let Some(prepared) = prepared else {
            let mut empty = GridAnalysisResult::empty(rows, cols);
            empty.ocr_service_summary = usage.summary();
            return Ok(empty);
        };
        let keys = self.key_pairs()?;
        let mapper = GridMapper::new(TokenMatcher::new(request.candidate_codes.as_slice()))?;
        let grid = &self.config.grid;
        let split = grid_split_count(rows, cols, grid.max_cells_per_tile)
            .max(image_split_count(&prepared.base64, grid));
        let (width, height) = (width as u32, height as u32);

        let outcome = rotate_keys(&keys, |keys| {
            let mut session = OcrSession::open(&self.provider, keys, &mut usage)?;
            let payload = prepared.base64.as_str();
            if split <= 1 {
                analyze_single_with_variants(&mut session, &mapper, payload, rows, cols, width, height, grid)
            } else {
                analyze_grid_by_tiles(
                    &mut session, &mapper, payload, rows, cols, width, height, split, grid,
                )
            }
        })?;

        let mut result = match outcome {
            Rotation::Done(result) => result,
            Rotation::Exhausted(e) => {
                crate::log(&format!("analyze-grid: quota exhausted, returning an empty grid: {}", e));
                GridAnalysisResult::empty(rows, cols)
            }
        };

        if let (Some(quantities), Some(hex_colors)) =
            (&request.candidate_quantities, &request.candidate_color_hex)
        {
            result = fill_missing_cells_by_color(
                &prepared.base64,
                result,
                &request.candidate_codes,
                quantities,
                hex_colors,
                &self.config.fill,
            );
        }

        result.ocr_service_summary = usage.summary();
        crate::log(&format!(
            "analyze-grid: {}x{}, filled {}, ocr hits {}, via {}",
            rows, cols, result.filled_count, result.ocr_count, result.ocr_service_summary
        ));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrConfig;
    use crate::model::PairingStrategy;
    use crate::ocr::{Bounds, Endpoint, OcrWord};
    use image::{Rgb, RgbImage};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Answers every recognition call with `words`, except for tokens listed
    /// in `quota_tokens` and images wider than `max_width`.
    struct FakeProvider {
        words: Vec<OcrWord>,
        quota_tokens: Vec<String>,
        max_width: Option<u32>,
        calls: RefCell<usize>,
    }

    impl FakeProvider {
        fn new(words: Vec<OcrWord>) -> Self {
            Self {
                words,
                quota_tokens: Vec::new(),
                max_width: None,
                calls: RefCell::new(0),
            }
        }
    }

    impl OcrProvider for FakeProvider {
        fn access_token(&self, keys: &KeyPair) -> Result<String> {
            Ok(format!("token-{}", keys.api_key))
        }

        fn recognize(&self, token: &str, image: &str, endpoint: Endpoint) -> Result<Vec<OcrWord>> {
            *self.calls.borrow_mut() += 1;
            if self.quota_tokens.iter().any(|t| t == token) {
                return Err(ScanError::provider(endpoint.display_name(), Some(17), "Open api daily request limit reached"));
            }
            if let Some(max_width) = self.max_width
                && decode_image(image).is_some_and(|img| img.width() > max_width)
            {
                return Err(ScanError::provider(endpoint.display_name(), Some(216202), "image size error"));
            }
            Ok(self.words.clone())
        }
    }

    fn make_word(text: &str, left: i64, top: i64) -> OcrWord {
        OcrWord::located(text, Bounds::new(left, top, 30, 20))
    }

    fn make_config(key_pairs: usize) -> ScanConfig {
        let mut ocr = OcrConfig::default();
        if key_pairs >= 1 {
            ocr.api_key = "ak1".to_string();
            ocr.secret_key = "sk1".to_string();
        }
        if key_pairs >= 2 {
            ocr.api_key2 = "ak2".to_string();
            ocr.secret_key2 = "sk2".to_string();
        }
        ScanConfig {
            ocr,
            ..ScanConfig::default()
        }
    }

    fn white_payload(width: u32, height: u32) -> String {
        let img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    fn grid_request(payload: String, rows: i64, cols: i64) -> GridRequest {
        GridRequest {
            image_base64: payload,
            rows,
            cols,
            image_width: 250,
            image_height: 250,
            candidate_codes: vec!["C11".to_string(), "B22".to_string()],
            candidate_quantities: None,
            candidate_color_hex: None,
            crop: None,
        }
    }

    fn list_words() -> Vec<OcrWord> {
        vec![make_word("C11", 0, 0), make_word("12", 40, 0)]
    }

    #[test]
    fn test_analyze_grid_places_words() {
        let provider = FakeProvider::new(vec![make_word("C11", 10, 10), make_word("B22", 60, 10)]);
        let scanner = BeadScanner::new(provider, make_config(1));

        let result = scanner.analyze_grid(&grid_request(white_payload(250, 250), 5, 5)).unwrap();

        assert_eq!((result.rows, result.cols), (5, 5));
        assert_eq!(result.filled_count, 2);
        assert_eq!(result.cells[0].code, "C11");
        assert_eq!((result.cells[1].row, result.cells[1].col), (0, 1));
        assert!(result.ocr_service_summary.starts_with("high-accuracy with location"));
    }

    #[test]
    fn test_analyze_grid_rejects_bad_parameters() {
        let scanner = BeadScanner::new(FakeProvider::new(Vec::new()), make_config(1));

        let err = scanner.analyze_grid(&grid_request(white_payload(10, 10), 0, 5)).unwrap_err();
        assert!(matches!(err, ScanError::InvalidParameters(_)));

        let mut request = grid_request(white_payload(10, 10), 5, 5);
        request.image_width = 0;
        let err = scanner.analyze_grid(&request).unwrap_err();
        assert!(matches!(err, ScanError::InvalidParameters(_)));
        assert_eq!(*scanner.provider.calls.borrow(), 0);
    }

    #[test]
    fn test_analyze_grid_empty_payload() {
        let scanner = BeadScanner::new(FakeProvider::new(Vec::new()), make_config(1));
        let result = scanner.analyze_grid(&grid_request("  ".to_string(), 3, 4)).unwrap();

        assert_eq!((result.rows, result.cols), (3, 4));
        assert!(result.cells.is_empty());
        assert_eq!(result.ocr_service_summary, "no OCR service called");
    }

    #[test]
    fn test_analyze_grid_requires_keys() {
        let scanner = BeadScanner::new(FakeProvider::new(Vec::new()), make_config(0));
        let err = scanner.analyze_grid(&grid_request(white_payload(10, 10), 2, 2)).unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn test_analyze_grid_crop_failure_never_falls_back() {
        let scanner = BeadScanner::new(FakeProvider::new(Vec::new()), make_config(1));
        let mut request = grid_request(white_payload(100, 100), 2, 2);
        request.crop = Some(CropRect {
            x: 10,
            y: 10,
            width: 0,
            height: 50,
        });

        let err = scanner.analyze_grid(&request).unwrap_err();
        assert!(matches!(err, ScanError::CropFailed(_)));
        assert_eq!(*scanner.provider.calls.borrow(), 0);
    }

    #[test]
    fn test_analyze_grid_crop_outside_image() {
        let scanner = BeadScanner::new(FakeProvider::new(Vec::new()), make_config(1));
        let mut request = grid_request(white_payload(100, 100), 2, 2);
        request.crop = Some(CropRect {
            x: 300,
            y: 300,
            width: 50,
            height: 50,
        });

        let err = scanner.analyze_grid(&request).unwrap_err();
        assert!(matches!(err, ScanError::CropFailed(_)));
        assert_eq!(*scanner.provider.calls.borrow(), 0);
    }

    #[test]
    fn test_analyze_grid_more_cells_than_pixels() {
        let scanner = BeadScanner::new(FakeProvider::new(vec![make_word("C11", 0, 0)]), make_config(1));
        let mut request = grid_request(white_payload(20, 20), 30, 30);
        request.image_width = 20;
        request.image_height = 20;

        let result = scanner.analyze_grid(&request).unwrap();
        assert_eq!((result.rows, result.cols), (30, 30));
    }

    #[test]
    fn test_analyze_grid_rotates_on_quota() {
        let mut provider = FakeProvider::new(vec![make_word("C11", 10, 10)]);
        provider.quota_tokens = vec!["token-ak1".to_string()];
        let scanner = BeadScanner::new(provider, make_config(2));

        let result = scanner.analyze_grid(&grid_request(white_payload(50, 50), 1, 1)).unwrap();
        assert_eq!(result.filled_count, 1);
    }

    #[test]
    fn test_analyze_grid_quota_on_every_key() {
        let mut provider = FakeProvider::new(vec![make_word("C11", 10, 10)]);
        provider.quota_tokens = vec!["token-ak1".to_string(), "token-ak2".to_string()];
        let scanner = BeadScanner::new(provider, make_config(2));

        let result = scanner.analyze_grid(&grid_request(white_payload(50, 50), 1, 1)).unwrap();
        assert!(result.cells.is_empty());
        assert_eq!(result.filled_count, 0);
        assert_ne!(result.ocr_service_summary, "no OCR service called");
    }

    #[test]
    fn test_analyze_grid_fills_by_color() {
        let img = RgbImage::from_fn(100, 50, |x, _| {
            if x < 50 { Rgb([255, 255, 255]) } else { Rgb([220, 30, 30]) }
        });
        let payload = encode_png(&DynamicImage::ImageRgb8(img)).unwrap();
        let mut config = make_config(1);
        config.grid.perspective_correction = false;
        config.grid.detect_boundaries = false;
        let scanner = BeadScanner::new(FakeProvider::new(vec![make_word("C11", 10, 10)]), config);

        let mut request = grid_request(payload, 1, 2);
        request.candidate_quantities = Some(HashMap::from([("C11".to_string(), 1), ("B22".to_string(), 1)]));
        request.candidate_color_hex = Some(HashMap::from([
            ("C11".to_string(), "#FFFFFF".to_string()),
            ("B22".to_string(), "#DC1E1E".to_string()),
        ]));

        let result = scanner.analyze_grid(&request).unwrap();
        assert_eq!(result.filled_count, 2);
        assert_eq!(result.cells[1].code, "B22");
        assert_eq!(result.ocr_count, 1);
    }

    #[test]
    fn test_extract_colors() {
        let scanner = BeadScanner::new(FakeProvider::new(list_words()), make_config(1));
        let colors = scanner.extract_colors(&white_payload(80, 40), None).unwrap();
        assert_eq!(colors, vec![ColorRequirement::new("C11", 12)]);
    }

    #[test]
    fn test_extract_colors_quota_gives_empty_list() {
        let mut provider = FakeProvider::new(list_words());
        provider.quota_tokens = vec!["token-ak1".to_string()];
        let scanner = BeadScanner::new(provider, make_config(1));

        let colors = scanner.extract_colors(&white_payload(80, 40), None).unwrap();
        assert!(colors.is_empty());
    }

    #[test]
    fn test_extract_colors_crop_failure_is_empty() {
        let scanner = BeadScanner::new(FakeProvider::new(list_words()), make_config(1));
        let crop = CropRect {
            x: 0,
            y: 0,
            width: -1,
            height: 10,
        };
        let colors = scanner.extract_colors(&white_payload(80, 40), Some(&crop)).unwrap();
        assert!(colors.is_empty());
        assert_eq!(*scanner.provider.calls.borrow(), 0);
    }

    #[test]
    fn test_extract_colors_debug() {
        let scanner = BeadScanner::new(FakeProvider::new(list_words()), make_config(1));
        let result = scanner.extract_colors_debug(&white_payload(80, 40), None).unwrap();

        assert_eq!(result.colors, vec![ColorRequirement::new("C11", 12)]);
        assert_eq!(result.strategy, ExtractionStrategy::Location(PairingStrategy::SingleLine));
        assert_eq!(result.raw_text, "C11\n12");
        assert_eq!(result.location_lines, vec!["1: C11 12".to_string()]);
        assert!(result.pair_logs[0].starts_with("payload: "));
    }

    #[test]
    fn test_extract_colors_debug_tiles_oversized_image() {
        let mut provider = FakeProvider::new(list_words());
        provider.max_width = Some(150);
        let scanner = BeadScanner::new(provider, make_config(1));

        let result = scanner.extract_colors_debug(&white_payload(200, 200), None).unwrap();

        assert_eq!(result.raw_text, TILED_RAW_TEXT);
        assert_eq!(result.colors, vec![ColorRequirement::new("C11", 48)]);
        assert!(result.pair_logs.iter().any(|l| l.contains("split=2x2")));
    }

    #[test]
    fn test_extract_colors_debug_crop_failed() {
        let scanner = BeadScanner::new(FakeProvider::new(list_words()), make_config(1));
        let crop = CropRect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
        let result = scanner.extract_colors_debug(&white_payload(80, 40), Some(&crop)).unwrap();

        assert_eq!(result.strategy, ExtractionStrategy::CropFailed);
        assert!(result.colors.is_empty());
        assert_eq!(result.ocr_service_summary, "no OCR service called");
        assert_eq!(result.pair_logs.len(), 2);
    }

    #[test]
    fn test_extract_colors_debug_quota_limit() {
        let mut provider = FakeProvider::new(list_words());
        provider.quota_tokens = vec!["token-ak1".to_string(), "token-ak2".to_string()];
        let scanner = BeadScanner::new(provider, make_config(2));

        let result = scanner.extract_colors_debug(&white_payload(80, 40), None).unwrap();
        assert_eq!(result.strategy, ExtractionStrategy::QuotaLimit);
        assert!(result.colors.is_empty());
    }

    #[test]
    fn test_extract_colors_debug_empty_image() {
        let scanner = BeadScanner::new(FakeProvider::new(list_words()), make_config(1));
        let result = scanner.extract_colors_debug("data:image/png;base64,", None).unwrap();
        assert_eq!(result.strategy, ExtractionStrategy::EmptyImage);
    }
}
