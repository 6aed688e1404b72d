//! Gemini `generateContent` client with Google Search grounding.

use crate::llm::{
    ActivityModelClient, GenerationSettings, ModelCompletion, UpstreamError,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const DEFAULT_GEMINI_API_BASE: &str =
    "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    api_base: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    tools: Vec<Tool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiApiError,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    message: String,
}

fn build_request<'a>(
    prompt: &'a str,
    settings: &GenerationSettings,
) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![RequestPart { text: prompt }],
        }],
        tools: vec![Tool {
            google_search: GoogleSearch {},
        }],
        generation_config: GenerationConfig {
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
        },
    }
}

/// Maps a non-success response onto the error kinds callers branch on.
/// Gemini reports a bad key as a 400 whose message mentions the API key.
fn classify_error(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> UpstreamError {
    let message = serde_json::from_str::<GeminiErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return UpstreamError::RateLimited { retry_after_secs };
    }
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || message.contains("API key")
    {
        return UpstreamError::Authentication(message);
    }
    UpstreamError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Joins the text parts of the first candidate and collects the grounding
/// queries it ran.
fn extract_completion(body: &str) -> Result<ModelCompletion, UpstreamError> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Decode(e.to_string()))?;

    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        UpstreamError::Decode("No candidates in response".to_string())
    })?;

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(UpstreamError::Decode(format!(
            "Candidate has no text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(ModelCompletion {
        text,
        search_queries: candidate
            .grounding_metadata
            .map(|g| g.web_search_queries)
            .unwrap_or_default(),
    })
}

#[async_trait]
impl ActivityModelClient for GeminiClient {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<ModelCompletion, UpstreamError> {
        let request = build_request(prompt, settings);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_error(status, retry_after_secs, &body));
        }

        let completion = extract_completion(&body)?;
        debug!(
            queries = ?completion.search_queries,
            "Gemini grounding searches"
        );
        Ok(completion)
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
