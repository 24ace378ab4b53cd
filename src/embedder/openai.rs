//! Embedding client for OpenAI-compatible `/embeddings` endpoints (OpenAI, Ollama, LM Studio).

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{DocQaError, Result};

use super::Embedder;

/// Connection settings for [`OpenAiEmbedder`].
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderOptions {
    /// Bearer token; local servers usually need none.
    pub api_key: Option<String>,
    /// Base URL, e.g. `http://127.0.0.1:11434/v1`.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Optional dimension override when supported by the model.
    pub dimensions: Option<usize>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts for rate limits or transient errors.
    pub max_retries: usize,
    /// Max inputs per request.
    pub batch_size: usize,
}

/// Blocking embeddings client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new embeddings client.
    pub fn new(options: OpenAiEmbedderOptions) -> Result<Self> {
        if options.model.trim().is_empty() {
            return Err(DocQaError::Config("missing embedding model name".into()));
        }
        let mut headers = HeaderMap::new();
        if let Some(key) = options.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| DocQaError::Config("invalid embedding API key".into()))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(options.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                DocQaError::Config(format!("failed to build embedding HTTP client: {err}"))
            })?;
        let endpoint = format!("{}/embeddings", options.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: options.model,
            dimensions: options.dimensions,
            max_retries: options.max_retries.max(1),
            batch_size: options.batch_size.max(1),
        })
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp.json().map_err(|err| {
                            DocQaError::Embedding(format!("failed to parse response: {err}"))
                        })?;
                        return vectors_from(parsed, inputs.len());
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(%status, attempt, "embedding request failed; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(DocQaError::Embedding(format!(
                        "request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(
                            error = %err,
                            attempt,
                            "embedding request errored; retrying"
                        );
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(DocQaError::Embedding(format!(
                        "request to {} failed: {err}",
                        self.endpoint
                    )));
                }
            }
        }
    }
}

impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.batch_size {
            return Err(DocQaError::Input(format!(
                "batch of {} exceeds configured max {}",
                inputs.len(),
                self.batch_size
            )));
        }
        self.request(inputs)
    }
}

/// Orders entries by `index` and checks one vector came back per input.
fn vectors_from(mut parsed: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(DocQaError::Embedding(format!(
            "service returned {} embeddings for {} inputs",
            parsed.data.len(),
            expected
        )));
    }
    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2000));
        assert_eq!(retry_backoff(9), retry_backoff(5));
    }

    fn response(body: &str) -> EmbeddingResponse {
        serde_json::from_str(body).expect("parse")
    }

    #[test]
    fn response_entries_are_reordered_by_index() {
        let parsed = response(
            r#"{"data":[{"embedding":[0.0,1.0],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#,
        );
        let vectors = vectors_from(parsed, 2).expect("vectors");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn short_response_is_an_embedding_error() {
        let parsed = response(r#"{"data":[{"embedding":[1.0],"index":0}]}"#);
        assert!(matches!(
            vectors_from(parsed, 3),
            Err(DocQaError::Embedding(_))
        ));
    }

    #[test]
    fn rejects_blank_model() {
        let result = OpenAiEmbedder::new(OpenAiEmbedderOptions {
            api_key: None,
            base_url: "http://127.0.0.1:11434/v1".into(),
            model: "  ".into(),
            dimensions: None,
            timeout: Duration::from_secs(1),
            max_retries: 1,
            batch_size: 8,
        });
        assert!(matches!(result, Err(DocQaError::Config(_))));
    }
}
