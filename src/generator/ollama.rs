//! Ollama `/api/generate` client.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::{DocQaError, Result};

use super::{non_empty, send_error, status_error, Generator};

/// Default local Ollama address.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Blocking, non-streaming Ollama client.
pub struct OllamaGenerator {
    client: Client,
    endpoint: String,
    timeout: Duration,
    temperature: f32,
}

impl OllamaGenerator {
    /// Builds a client for `base_url` with an explicit request timeout.
    pub fn new(base_url: &str, timeout: Duration, temperature: f32) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|err| {
            DocQaError::Config(format!("failed to build Ollama HTTP client: {err}"))
        })?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            timeout,
            temperature,
        })
    }
}

impl Generator for OllamaGenerator {
    fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|err| send_error(err, model, self.timeout))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(status_error(status, text, model));
        }
        let parsed: GenerateResponse = resp
            .json()
            .map_err(|err| send_error(err, model, self.timeout))?;
        answer_from(parsed, model)
    }
}

fn answer_from(parsed: GenerateResponse, model: &str) -> Result<String> {
    if let Some(error) = parsed.error {
        return Err(DocQaError::GenerationFailure {
            model: model.to_string(),
            message: error,
            transient: false,
        });
    }
    non_empty(parsed.response, model)
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_disables_streaming() {
        let body = serde_json::to_value(GenerateRequest {
            model: "phi3:mini",
            prompt: "hi",
            stream: false,
            options: GenerateOptions { temperature: 0.2 },
        })
        .expect("serialize");
        assert_eq!(body["stream"], serde_json::json!(false));
        assert_eq!(body["model"], "phi3:mini");
    }

    fn parse(body: &str) -> GenerateResponse {
        serde_json::from_str(body).expect("parse")
    }

    #[test]
    fn response_text_is_trimmed() {
        let parsed = parse(r#"{"model":"phi3:mini","response":" Light [1].\n","done":true}"#);
        assert_eq!(answer_from(parsed, "phi3:mini").expect("answer"), "Light [1].");
    }

    #[test]
    fn response_without_text_is_a_failure() {
        let parsed = parse(r#"{"model":"phi3:mini","done":true}"#);
        assert!(matches!(
            answer_from(parsed, "phi3:mini"),
            Err(DocQaError::GenerationFailure { .. })
        ));
    }

    #[test]
    fn error_field_is_a_permanent_failure() {
        let parsed = parse(r#"{"error":"model 'phi9' not found"}"#);
        let err = answer_from(parsed, "phi9").unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn endpoint_joins_base_url() {
        let generator =
            OllamaGenerator::new("http://localhost:11434/", Duration::from_secs(1), 0.0)
                .expect("client");
        assert_eq!(generator.endpoint, "http://localhost:11434/api/generate");
    }
}
