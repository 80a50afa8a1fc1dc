//! OCR provider access and parsing of its output.

pub mod client;
pub mod engine;
pub mod extract;
pub mod rate_limit;
pub mod tokens;

pub use client::{BaiduOcrClient, Endpoint, OcrProvider, OcrSession, ServiceUsage};
pub use engine::{build_ocr_lines, Bounds, OcrLine, OcrWord};
pub use extract::{
    choose_list, confidence_score, is_better, parse_by_location, parse_by_text, ListChoice,
    ListParse,
};
pub use rate_limit::RateLimiter;
pub use tokens::{compare_codes, normalize_color_code, normalize_ocr_token, TokenMatcher};
