//! Text generation backends and the retry policy wrapped around them.

pub mod ollama;
pub mod openai;

use std::thread;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{DocQaError, Result};

/// A black-box text generator.
pub trait Generator: Send + Sync {
    /// Produces an answer for `prompt` with `model`.
    ///
    /// Implementations report a lapsed deadline as
    /// [`DocQaError::GenerationTimeout`] and an error status or empty answer as
    /// [`DocQaError::GenerationFailure`], marked transient only for transport
    /// errors and server-side statuses.
    fn generate(&self, prompt: &str, model: &str) -> Result<String>;
}

/// Retries transient generation failures with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    /// Delay before the first retry; doubled for each further retry.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), capped at 32x the base.
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(5) as u32;
        self.base_backoff * (1u32 << exponent)
    }

    /// Calls `generator` until it succeeds, fails permanently, or attempts run out.
    pub fn generate(&self, generator: &dyn Generator, prompt: &str, model: &str) -> Result<String> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match generator.generate(prompt, model) {
                Ok(answer) => return Ok(answer),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        model,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "generation failed; retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub(crate) fn send_error(err: reqwest::Error, model: &str, timeout: Duration) -> DocQaError {
    if err.is_timeout() {
        DocQaError::GenerationTimeout {
            model: model.to_string(),
            timeout,
        }
    } else {
        DocQaError::GenerationFailure {
            model: model.to_string(),
            message: err.to_string(),
            transient: err.is_connect() || err.is_request() || err.is_body(),
        }
    }
}

pub(crate) fn status_error(status: StatusCode, body: String, model: &str) -> DocQaError {
    DocQaError::GenerationFailure {
        model: model.to_string(),
        message: format!("backend returned {status}: {body}"),
        transient: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
    }
}

pub(crate) fn non_empty(answer: String, model: &str) -> Result<String> {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return Err(DocQaError::GenerationFailure {
            model: model.to_string(),
            message: "backend returned an empty answer".into(),
            transient: false,
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Generator for Scripted {
        fn generate(&self, _prompt: &str, _model: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("fallback".into()))
        }
    }

    fn timeout() -> DocQaError {
        DocQaError::GenerationTimeout {
            model: "m".into(),
            timeout: Duration::from_secs(1),
        }
    }

    fn fast(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn retries_transient_failures_until_success() {
        let generator = Scripted::new(vec![Err(timeout()), Ok("answer [1]".into())]);
        let answer = fast(3).generate(&generator, "p", "m").expect("answer");
        assert_eq!(answer, "answer [1]");
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn surfaces_last_error_after_exhausting_attempts() {
        let generator = Scripted::new(vec![Err(timeout()), Err(timeout()), Err(timeout())]);
        let err = fast(3).generate(&generator, "p", "m").unwrap_err();
        assert!(matches!(err, DocQaError::GenerationTimeout { .. }));
        assert_eq!(generator.calls(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let generator = Scripted::new(vec![Err(DocQaError::UnknownModel("x".into()))]);
        let err = fast(3).generate(&generator, "p", "m").unwrap_err();
        assert!(matches!(err, DocQaError::UnknownModel(_)));
        assert_eq!(generator.calls(), 1);
    }

    #[test]
    fn client_errors_fail_without_retry() {
        let missing = status_error(StatusCode::NOT_FOUND, "model not found".into(), "m");
        let generator = Scripted::new(vec![Err(missing)]);
        let err = fast(3).generate(&generator, "p", "m").unwrap_err();
        assert!(matches!(
            err,
            DocQaError::GenerationFailure {
                transient: false,
                ..
            }
        ));
        assert_eq!(generator.calls(), 1);
    }

    #[test]
    fn server_errors_are_retried() {
        let unavailable = status_error(StatusCode::SERVICE_UNAVAILABLE, "busy".into(), "m");
        assert!(unavailable.is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new(), "m").is_retryable());
        let generator = Scripted::new(vec![Err(unavailable), Ok("answer [1]".into())]);
        assert_eq!(
            fast(3).generate(&generator, "p", "m").expect("answer"),
            "answer [1]"
        );
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(20), Duration::from_millis(16_000));
    }

    #[test]
    fn empty_answers_are_failures() {
        let err = non_empty("  \n".into(), "m").unwrap_err();
        assert!(matches!(err, DocQaError::GenerationFailure { .. }));
        assert!(!err.is_retryable());
        assert_eq!(non_empty(" ok ".into(), "m").expect("answer"), "ok");
    }
}
