//! OpenAI-compatible chat completions client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::error::{DocQaError, Result};

use super::{non_empty, send_error, status_error, Generator};

/// Default OpenAI API base.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str =
    "You answer user questions using only the provided context and cite sources by their bracketed IDs.";

/// Blocking chat completions client.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    timeout: Duration,
    temperature: f32,
}

impl OpenAiGenerator {
    /// Builds a client; `api_key` may be omitted for local compatible servers.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
        temperature: f32,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| DocQaError::Config("invalid generation API key".into()))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                DocQaError::Config(format!("failed to build OpenAI HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            timeout,
            temperature,
        })
    }
}

impl Generator for OpenAiGenerator {
    fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        let body = ChatRequest {
            model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
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
        let parsed: ChatResponse = resp
            .json()
            .map_err(|err| send_error(err, model, self.timeout))?;
        answer_from(parsed, model)
    }
}

/// First choice carrying content; empty or missing content is a failure.
fn answer_from(parsed: ChatResponse, model: &str) -> Result<String> {
    let answer = parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .unwrap_or_default();
    non_empty(answer, model)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
