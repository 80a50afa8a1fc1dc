//! Image payload decoding and pixel-level preprocessing.

pub mod payload;
pub mod preprocess;

pub use payload::{
    decode_image, diagnose_payload, encode_jpeg, encode_png, normalize_for_ocr,
    strip_data_url_prefix,
};
pub use preprocess::{
    apply_contrast, binarize, binarize_otsu, build_ocr_variants, crop_rect, luminance,
    otsu_threshold, scale_image, to_grayscale, OcrVariant,
};
