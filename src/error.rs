//! Error types for the scanning engine.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ScanError>;

/// Provider error codes that mean the daily request quota is used up.
const QUOTA_CODES: [i64; 2] = [17, 19];
/// Provider error code for images above the accepted size.
const IMAGE_SIZE_CODE: i64 = 216202;
/// Provider error code for images in a format it refuses.
const IMAGE_FORMAT_CODE: i64 = 216201;

#[derive(Error, Debug)]
pub enum ScanError {
    /// No usable OCR credentials
    #[error("OCR is not configured: {0}")]
    Configuration(String),

    /// The OCR provider rejected or failed a call
    #[error("{service} failed (code {}): {message}", code_label(.code))]
    Provider {
        service: String,
        code: Option<i64>,
        message: String,
    },

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// Perspective or grid detection could not produce a trustworthy result
    #[error("Grid geometry unavailable: {0}")]
    GeometryUnavailable(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The requested crop rectangle does not select any pixels
    #[error("Crop failed: {0}")]
    CropFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

fn code_label(code: &Option<i64>) -> String {
    code.map_or_else(|| "n/a".to_string(), |c| c.to_string())
}

impl ScanError {
    pub fn provider(service: impl Into<String>, code: Option<i64>, message: impl Into<String>) -> Self {
        ScanError::Provider {
            service: service.into(),
            code,
            message: message.into(),
        }
    }

    /// Wraps a transport failure (timeout, connection reset, bad body).
    pub fn transport(service: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ScanError::provider(service, None, err.to_string())
    }

    /// True when the provider refused the call because the request quota is exhausted.
    pub fn is_quota(&self) -> bool {
        match self {
            ScanError::Provider { code, message, .. } => {
                code.is_some_and(|c| QUOTA_CODES.contains(&c))
                    || message.to_ascii_lowercase().contains("request limit")
            }
            _ => false,
        }
    }

    /// True when the provider rejected the image for its size or format.
    /// Callers react by retrying on smaller tiles.
    pub fn is_image_size_or_format(&self) -> bool {
        match self {
            ScanError::Provider { code, message, .. } => {
                let lower = message.to_ascii_lowercase();
                code.is_some_and(|c| c == IMAGE_SIZE_CODE || c == IMAGE_FORMAT_CODE)
                    || lower.contains("image size error")
                    || lower.contains("image format error")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_by_code() {
        assert!(ScanError::provider("accurate", Some(17), "Open api daily request limit reached").is_quota());
        assert!(ScanError::provider("accurate", Some(19), "total limit").is_quota());
        assert!(!ScanError::provider("accurate", Some(110), "Access token invalid").is_quota());
    }

    #[test]
    fn test_quota_by_message() {
        let err = ScanError::provider("general", None, "Open API Request Limit Reached");
        assert!(err.is_quota());
    }

    #[test]
    fn test_image_size_or_format() {
        assert!(ScanError::provider("accurate", Some(216202), "image size error").is_image_size_or_format());
        assert!(ScanError::provider("accurate", Some(216201), "image format error").is_image_size_or_format());
        assert!(!ScanError::provider("accurate", Some(17), "limit").is_image_size_or_format());
        assert!(!ScanError::InvalidParameters("rows".into()).is_image_size_or_format());
    }

    #[test]
    fn test_display_without_code() {
        let err = ScanError::transport("token", "timed out");
        assert_eq!(err.to_string(), "token failed (code n/a): timed out");
    }
}
