pub mod anthropic;
pub mod gemini;
pub mod novelai;
pub mod openai;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use thiserror::Error;

use crate::catalog::{Direction, ModelSpec};

/// Longest error body kept from a failed response.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api returned {status}: {body}")]
    Api {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("provider returned no text")]
    EmptyResponse,
}

fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429 | 500..=599)
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| retryable_status(s.as_u16()))
            }
            Self::Api { status, .. } => retryable_status(*status),
            Self::EmptyResponse => true,
            Self::Serde(_) => false,
        }
    }

    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Turns a non-2xx response into `ProviderError::Api`, keeping the start of
/// the body for the error message.
pub(crate) async fn ensure_success(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .filter(|d| *d < Duration::from_secs(60));
    let mut body = resp.text().await.unwrap_or_default();
    if let Some((cut, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
        body.truncate(cut);
        body.push('…');
    }
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
        retry_after,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Token counts as reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<Usage>,
}

impl Generation {
    /// Rejects blank output so it can be retried like any transient failure.
    pub(crate) fn non_empty(text: String, usage: Option<Usage>) -> Result<Self, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(Self { text, usage })
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &ModelSpec;

    fn estimate_tokens(&self, text: &str) -> usize {
        self.model().family.estimate(text)
    }

    /// USD per token for a request with a `prompt_tokens` long prompt, which
    /// picks the tier on tiered models. `None` for subscription models.
    fn cost_per_token(&self, direction: Direction, prompt_tokens: usize) -> Option<f64> {
        self.model().pricing.rate(direction, prompt_tokens)
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<Generation, ProviderError>;
}
