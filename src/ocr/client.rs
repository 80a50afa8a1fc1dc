//! OCR provider access.
//!
//! [`OcrProvider`] is the seam between the scanning pipelines and the
//! network. [`BaiduOcrClient`] talks to the Baidu-compatible REST API;
//! tests substitute their own provider. [`OcrSession`] wraps one access
//! token and walks the endpoint fallback chains.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::engine::{words_to_text, Bounds, OcrWord};
use super::rate_limit::RateLimiter;
use crate::config::{KeyPair, OcrConfig};
use crate::error::{Result, ScanError};

/// Recognition endpoints, named as in the provider's URL paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Accurate,
    General,
    AccurateBasic,
    GeneralBasic,
    WebImage,
}

/// Location endpoints in fallback order.
pub const LOCATION_CHAIN: [Endpoint; 2] = [Endpoint::Accurate, Endpoint::General];
/// Text-only endpoints in fallback order.
pub const TEXT_CHAIN: [Endpoint; 3] = [
    Endpoint::AccurateBasic,
    Endpoint::GeneralBasic,
    Endpoint::WebImage,
];

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Accurate => "accurate",
            Endpoint::General => "general",
            Endpoint::AccurateBasic => "accurate_basic",
            Endpoint::GeneralBasic => "general_basic",
            Endpoint::WebImage => "webimage",
        }
    }

    /// Name shown in service summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            Endpoint::Accurate => "high-accuracy with location",
            Endpoint::General => "standard with location",
            Endpoint::AccurateBasic => "high-accuracy",
            Endpoint::GeneralBasic => "standard",
            Endpoint::WebImage => "web image",
        }
    }

    /// True when the endpoint returns word boxes.
    pub fn with_location(&self) -> bool {
        matches!(self, Endpoint::Accurate | Endpoint::General)
    }
}

/// Something that can turn an image into words.
pub trait OcrProvider {
    /// Exchanges a credential pair for an access token.
    fn access_token(&self, keys: &KeyPair) -> Result<String>;

    /// Recognizes a base64-encoded image. Location endpoints return words with
    /// bounds, text endpoints words without.
    fn recognize(&self, token: &str, image_base64: &str, endpoint: Endpoint) -> Result<Vec<OcrWord>>;
}

/// Blocking HTTP client for the Baidu OCR API.
pub struct BaiduOcrClient {
    http: reqwest::blocking::Client,
    token_url: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl BaiduOcrClient {
    pub fn new(config: &OcrConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("bead-grid-ocr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScanError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    /// Sends a POST and parses the body as JSON. Non-2xx statuses and
    /// transport failures become provider errors for `service`.
    fn post_json(&self, service: &str, request: reqwest::blocking::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .map_err(|e| ScanError::transport(service, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::provider(service, None, format!("HTTP {}", status)));
        }

        let body = response.text().map_err(|e| ScanError::transport(service, e))?;
        serde_json::from_str(&body).map_err(|e| ScanError::transport(service, e))
    }
}

impl OcrProvider for BaiduOcrClient {
    fn access_token(&self, keys: &KeyPair) -> Result<String> {
        let request = self.http.post(&self.token_url).query(&[
            ("grant_type", "client_credentials"),
            ("client_id", keys.api_key.as_str()),
            ("client_secret", keys.secret_key.as_str()),
        ]);
        let root = self.post_json("token", request)?;
        parse_token_response(&root)
    }

    fn recognize(&self, token: &str, image_base64: &str, endpoint: Endpoint) -> Result<Vec<OcrWord>> {
        self.limiter.acquire();

        let mut form = vec![
            ("image", image_base64),
            ("detect_direction", "true"),
            ("probability", "false"),
        ];
        if endpoint.with_location() {
            form.push(("vertexes_location", "false"));
        }

        let url = format!("{}/{}", self.base_url, endpoint.path());
        let request = self
            .http
            .post(url)
            .query(&[("access_token", token)])
            .form(&form);
        let root = self.post_json(endpoint.display_name(), request)?;
        parse_recognition_response(&root, endpoint)
    }
}

fn parse_token_response(root: &Value) -> Result<String> {
    if let Some(error) = root.get("error").filter(|v| !v.is_null()) {
        let message = root
            .get("error_description")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("unknown");
        return Err(ScanError::provider("token", None, message));
    }

    match root.get("access_token").and_then(Value::as_str) {
        Some(token) if !token.trim().is_empty() => Ok(token.to_string()),
        _ => Err(ScanError::provider("token", None, "response has no access_token")),
    }
}

fn parse_recognition_response(root: &Value, endpoint: Endpoint) -> Result<Vec<OcrWord>> {
    if let Some(code) = root.get("error_code").filter(|v| !v.is_null()) {
        let message = root
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(ScanError::provider(endpoint.display_name(), code.as_i64(), message));
    }

    let Some(items) = root.get("words_result").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut words = Vec::new();
    for item in items {
        let text = item.get("words").and_then(Value::as_str).unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        if !endpoint.with_location() {
            words.push(OcrWord::plain(text));
            continue;
        }
        // Words without a box cannot be placed.
        let Some(location) = item.get("location") else {
            continue;
        };
        let field = |name: &str| location.get(name).and_then(Value::as_i64).unwrap_or(0);
        let bounds = Bounds::new(field("left"), field("top"), field("width"), field("height"));
        words.push(OcrWord::located(text, bounds));
    }
    Ok(words)
}

/// Endpoints called while serving one request, in first-use order.
#[derive(Debug, Clone, Default)]
pub struct ServiceUsage {
    used: Vec<Endpoint>,
}

impl ServiceUsage {
    pub fn record(&mut self, endpoint: Endpoint) {
        if !self.used.contains(&endpoint) {
            self.used.push(endpoint);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Display names joined with arrows, e.g. `high-accuracy with location → high-accuracy`.
    pub fn summary(&self) -> String {
        if self.used.is_empty() {
            return "no OCR service called".to_string();
        }
        self.used
            .iter()
            .map(Endpoint::display_name)
            .collect::<Vec<_>>()
            .join(" → ")
    }
}

/// One access token plus the usage record of the current request.
pub struct OcrSession<'a, P: OcrProvider> {
    provider: &'a P,
    token: String,
    usage: &'a mut ServiceUsage,
}

impl<'a, P: OcrProvider> OcrSession<'a, P> {
    /// Fetches a token for `keys`.
    pub fn open(provider: &'a P, keys: &KeyPair, usage: &'a mut ServiceUsage) -> Result<Self> {
        let token = provider.access_token(keys)?;
        Ok(Self {
            provider,
            token,
            usage,
        })
    }

    /// Word boxes from the first location endpoint that answers.
    pub fn words_with_location(&mut self, image_base64: &str) -> Result<Vec<OcrWord>> {
        self.first_success(&LOCATION_CHAIN, image_base64)
    }

    /// Raw text (one word per line) from the first text endpoint that answers.
    pub fn raw_text(&mut self, image_base64: &str) -> Result<String> {
        let words = self.first_success(&TEXT_CHAIN, image_base64)?;
        Ok(words_to_text(&words))
    }

    /// Tries each endpoint in turn. When every one fails, the first error is
    /// reported since it comes from the most capable endpoint.
    fn first_success(&mut self, chain: &[Endpoint], image_base64: &str) -> Result<Vec<OcrWord>> {
        let mut first_error: Option<ScanError> = None;
        for (i, &endpoint) in chain.iter().enumerate() {
            self.usage.record(endpoint);
            match self.provider.recognize(&self.token, image_base64, endpoint) {
                Ok(words) => return Ok(words),
                Err(e) => {
                    if let Some(next) = chain.get(i + 1) {
                        crate::log(&format!(
                            "OCR fallback: {} failed, trying {}. reason={}",
                            endpoint.path(),
                            next.path(),
                            e
                        ));
                    }
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| ScanError::Configuration("empty endpoint chain".to_string())))
    }
}
