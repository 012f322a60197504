use std::time::Duration;
use url::Url;

pub const OCR_ENDPOINT_VAR: &str = "TUTOR_OCR_ENDPOINT";
pub const OCR_API_KEY_VAR: &str = "TUTOR_OCR_API_KEY";
pub const GENERATION_ENDPOINT_VAR: &str = "TUTOR_GENERATION_ENDPOINT";
pub const GENERATION_API_KEY_VAR: &str = "TUTOR_GENERATION_API_KEY";
pub const EMBEDDING_ENDPOINT_VAR: &str = "TUTOR_EMBEDDING_ENDPOINT";
pub const EMBEDDING_API_KEY_VAR: &str = "TUTOR_EMBEDDING_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl EndpointConfig {
    /// Builds a config from raw values. Blank endpoints yield `None` and
    /// blank keys are dropped.
    pub fn from_parts(endpoint: Option<&str>, api_key: Option<&str>) -> Option<Self> {
        let endpoint = endpoint?.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = api_key.and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Some(Self { endpoint, api_key })
    }

    pub fn url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.endpoint)
    }
}

/// Backoff and pacing for the remote OCR batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub request_delay: Duration,
}

impl Default for OcrRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            request_delay: Duration::from_secs(5),
        }
    }
}

impl OcrRetryPolicy {
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            request_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        self.base_delay.saturating_mul(2u32.pow(exponent + 1))
    }
}
