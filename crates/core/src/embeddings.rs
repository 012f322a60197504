use crate::config::EndpointConfig;
use crate::error::{IndexError, TutorError};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::warn;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub trait Embedder {
    fn dimensions(&self) -> usize;

    /// Must return identical vectors for identical input.
    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        (**self).embed(text)
    }
}

/// Hashes lowercase character trigrams into buckets and L2-normalizes the
/// counts. Needs no model files or network access.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

/// Blocking client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(
        config: &EndpointConfig,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, TutorError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(TutorError::ConfigurationMissing(
                "embedding model name".to_string(),
            ));
        }

        let base = config.url()?;
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base.as_str().trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model,
            dimensions,
            max_retries: 3,
        })
    }

    fn request_once(&self, text: &str) -> Result<Result<Vec<f32>, StatusCode>, IndexError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.dimensions,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .map_err(|error| IndexError::Embedding(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Ok(Err(status));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|error| IndexError::Embedding(error.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| IndexError::Embedding("response carried no embedding".to_string()))?;

        Ok(Ok(vector))
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(text)? {
                Ok(vector) => {
                    if vector.len() != self.dimensions {
                        return Err(IndexError::DimensionMismatch {
                            expected: self.dimensions,
                            actual: vector.len(),
                        });
                    }
                    return Ok(vector);
                }
                Err(status) => {
                    attempt += 1;
                    if should_retry(status, attempt, self.max_retries) {
                        let wait = retry_delay(attempt);
                        warn!(%status, attempt, wait_ms = wait.as_millis() as u64, "embedding request retry");
                        thread::sleep(wait);
                        continue;
                    }
                    return Err(IndexError::Embedding(format!(
                        "embedding request to {} returned {}",
                        self.endpoint, status
                    )));
                }
            }
        }
    }
}

/// Rate limits and server errors are retried until `max_retries` attempts
/// have been made.
fn should_retry(status: StatusCode, attempt: u32, max_retries: u32) -> bool {
    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    retryable && attempt < max_retries
}

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(5)))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
