//! Clients for the generative model that answers activity searches.
//!
//! Gemini is the primary provider because it can ground answers in live
//! Google search results. Any OpenAI-compatible endpoint works as a fallback
//! without grounding, and the fake client backs the tests.

pub mod fake;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_output_tokens: 2000,
        }
    }
}

/// What the model said, plus the web searches it ran when grounded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCompletion {
    pub text: String,
    pub search_queries: Vec<String>,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream rejected the API key: {0}")]
    Authentication(String),

    #[error("Upstream rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream request failed: {0}")]
    RequestFailed(String),

    #[error("Upstream returned error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    #[error("Model client not configured: {0}")]
    NotConfigured(String),
}

impl UpstreamError {
    /// Only transient failures are retried; credential and quota problems
    /// go straight back to the user.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::RequestFailed(_) => true,
            UpstreamError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// A generative model that turns a prompt into free text.
///
/// Implementations must be cheap to share between requests; the server
/// holds one behind an `Arc` for its whole lifetime.
#[async_trait]
pub trait ActivityModelClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<ModelCompletion, UpstreamError>;

    /// Provider name, e.g. "gemini" or "openai".
    fn provider_name(&self) -> &'static str;

    /// Model identifier reported back to callers.
    fn model_name(&self) -> &str;
}

/// Timeout and retry policy wrapped around every upstream call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

#[instrument(skip(client, prompt, settings), fields(provider = client.provider_name(), model = client.model_name()))]
pub async fn generate_with_retry(
    client: &dyn ActivityModelClient,
    prompt: &str,
    settings: &GenerationSettings,
    policy: &RetryPolicy,
) -> Result<ModelCompletion, UpstreamError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = tokio::time::timeout(
            policy.timeout,
            client.generate(prompt, settings),
        )
        .await
        .unwrap_or_else(|_| Err(UpstreamError::Timeout(policy.timeout)));

        match result {
            Ok(completion) => {
                info!(attempt, chars = completion.text.len(), "Model answered");
                return Ok(completion);
            }
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(attempt, error = %e, "Upstream call failed, retrying");
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    Gemini,
    Openai,
}

/// Connection settings for whichever provider is selected.
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    pub provider: Provider,
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_base: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub openai_model: String,
}

pub fn create_model_client(
    config: &ModelClientConfig,
) -> Result<Arc<dyn ActivityModelClient>, UpstreamError> {
    match config.provider {
        Provider::Gemini => {
            let api_key = config
                .google_api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    UpstreamError::NotConfigured(
                        "GOOGLE_API_KEY not set".to_string(),
                    )
                })?;
            let mut client =
                gemini::GeminiClient::new(api_key, config.gemini_model.clone());
            if let Some(base) = &config.gemini_api_base {
                client = client.with_api_base(base);
            }
            Ok(Arc::new(client))
        }
        Provider::Openai => Ok(Arc::new(openai::OpenAIClient::new(
            config.openai_api_key.clone(),
            config.openai_api_base.clone(),
            config.openai_model.clone(),
        )?)),
    }
}
