use crate::llm::{
    ActivityModelClient, GenerationSettings, ModelCompletion, UpstreamError,
};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::instrument;

// Chat completions against any OpenAI-compatible endpoint. There is no
// search grounding here, so answers lean on the model's own knowledge.
pub struct OpenAIClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIClient {
    pub fn new(
        api_key: Option<String>,
        api_base: Option<String>,
        model: String,
    ) -> Result<Self, UpstreamError> {
        let api_key = api_key.filter(|k| !k.is_empty()).ok_or_else(|| {
            UpstreamError::NotConfigured("OPENAI_API_KEY not set".to_string())
        })?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(api_base) = api_base {
            config = config.with_api_base(api_base);
        }

        Ok(Self {
            client: Client::with_config(config),
            model,
        })
    }
}

fn map_openai_error(error: OpenAIError) -> UpstreamError {
    match error {
        OpenAIError::ApiError(api_error) => {
            let code = api_error.code.as_deref().unwrap_or_default();
            let kind = api_error.r#type.as_deref().unwrap_or_default();
            if code == "invalid_api_key"
                || (kind == "invalid_request_error"
                    && api_error.message.contains("API key"))
            {
                UpstreamError::Authentication(api_error.message)
            } else if code == "rate_limit_exceeded"
                || kind == "insufficient_quota"
                || kind == "rate_limit_error"
            {
                UpstreamError::RateLimited {
                    retry_after_secs: None,
                }
            } else {
                // The error body carries no HTTP status; only server-side
                // kinds are treated as transient.
                let status = match kind {
                    "server_error" | "api_error" | "" => 500,
                    "authentication_error" | "permission_error" => {
                        return UpstreamError::Authentication(api_error.message)
                    }
                    "not_found_error" => 404,
                    _ => 400,
                };
                UpstreamError::Api {
                    status,
                    message: api_error.message,
                }
            }
        }
        OpenAIError::Reqwest(e) => UpstreamError::RequestFailed(e.to_string()),
        OpenAIError::JSONDeserialize(e) => UpstreamError::Decode(e.to_string()),
        OpenAIError::InvalidArgument(message) => UpstreamError::Api {
            status: 400,
            message,
        },
        other => UpstreamError::RequestFailed(other.to_string()),
    }
}

#[async_trait]
impl ActivityModelClient for OpenAIClient {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<ModelCompletion, UpstreamError> {
        let user_message = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(map_openai_error)?,
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages([user_message])
            .temperature(settings.temperature)
            .max_completion_tokens(settings.max_output_tokens)
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .map(String::from)
            .ok_or_else(|| {
                UpstreamError::Decode("No content in response".to_string())
            })?;

        Ok(ModelCompletion {
            text,
            search_queries: vec![],
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(code: Option<&str>, kind: Option<&str>, message: &str) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: kind.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let result = OpenAIClient::new(None, None, "gpt-4o-mini".to_string());
        assert!(matches!(result, Err(UpstreamError::NotConfigured(_))));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_openai_error(api_error(Some("invalid_api_key"), None, "Incorrect API key provided")),
            UpstreamError::Authentication(_)
        ));
        assert!(matches!(
            map_openai_error(api_error(Some("rate_limit_exceeded"), None, "slow down")),
            UpstreamError::RateLimited { .. }
        ));
        assert!(matches!(
            map_openai_error(api_error(None, Some("server_error"), "boom")),
            UpstreamError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_request_errors_are_not_retried() {
        let err = map_openai_error(api_error(
            Some("context_length_exceeded"),
            Some("invalid_request_error"),
            "This model's maximum context length is 8192 tokens",
        ));
        assert!(matches!(err, UpstreamError::Api { status: 400, .. }));
        assert!(!err.is_retryable());

        let err = map_openai_error(api_error(
            Some("model_not_found"),
            Some("not_found_error"),
            "The model does not exist",
        ));
        assert!(matches!(err, UpstreamError::Api { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_errors_are_retried() {
        let err = map_openai_error(api_error(None, Some("server_error"), "boom"));
        assert!(err.is_retryable());
        let err = map_openai_error(api_error(None, None, "unknown failure"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_permission_errors_map_to_authentication() {
        assert!(matches!(
            map_openai_error(api_error(None, Some("permission_error"), "denied")),
            UpstreamError::Authentication(_)
        ));
    }
}
