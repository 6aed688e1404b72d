use crate::llm::{
    GenerationSettings, ModelClientConfig, Provider, RetryPolicy,
    DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL,
};
use clap::Parser;
use std::time::Duration;

/// Upstream model options shared by the server and the command-line tool
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Which model provider answers searches
    #[arg(long, value_enum, default_value = "gemini", env = "MODEL_PROVIDER")]
    pub provider: Provider,

    /// Google AI Studio API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Gemini model used for grounded searches
    #[arg(long, default_value = DEFAULT_GEMINI_MODEL, env = "GEMINI_MODEL")]
    pub gemini_model: String,

    /// Gemini API base URL
    #[arg(long, env = "GEMINI_API_BASE")]
    pub gemini_api_base: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL
    #[arg(long, env = "OPENAI_API_BASE")]
    pub openai_api_base: Option<String>,

    /// Model used with the OpenAI provider
    #[arg(long, default_value = DEFAULT_OPENAI_MODEL, env = "OPENAI_MODEL")]
    pub openai_model: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    /// Output token ceiling
    #[arg(long, default_value_t = 2000)]
    pub max_output_tokens: u32,

    /// Seconds before an upstream attempt is abandoned
    #[arg(long, default_value_t = 60)]
    pub upstream_timeout_secs: u64,

    /// Total upstream attempts for transient failures
    #[arg(long, default_value_t = 2)]
    pub upstream_attempts: u32,
}

impl CommonArgs {
    pub fn model_client_config(&self) -> ModelClientConfig {
        ModelClientConfig {
            provider: self.provider,
            google_api_key: self.google_api_key.clone(),
            gemini_model: self.gemini_model.clone(),
            gemini_api_base: self.gemini_api_base.clone(),
            openai_api_key: self.openai_api_key.clone(),
            openai_api_base: self.openai_api_base.clone(),
            openai_model: self.openai_model.clone(),
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.upstream_timeout_secs),
            max_attempts: self.upstream_attempts,
            ..RetryPolicy::default()
        }
    }
}
