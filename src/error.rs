use crate::criteria::CriteriaError;
use crate::finder::FinderError;
use crate::llm::UpstreamError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl ErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: Some(message.into()),
            required: None,
            raw_response: None,
        }
    }
}

/// Every way a search request can fail, as seen by the HTTP client.
#[derive(Debug)]
pub enum ApiError {
    MissingFields(Vec<&'static str>),
    InvalidInput(String),
    InvalidBody(String),
    Unauthorized,
    RateLimited { retry_after_secs: Option<u64> },
    Timeout,
    Unavailable(String),
    ParseFailed { raw_response: String },
    Internal(String),
}

impl From<CriteriaError> for ApiError {
    fn from(err: CriteriaError) -> Self {
        match err {
            CriteriaError::MissingFields(fields) => ApiError::MissingFields(fields),
            invalid @ CriteriaError::Invalid { .. } => {
                ApiError::InvalidInput(invalid.to_string())
            }
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Authentication(_) => ApiError::Unauthorized,
            UpstreamError::RateLimited { retry_after_secs } => {
                ApiError::RateLimited { retry_after_secs }
            }
            UpstreamError::Timeout(_) => ApiError::Timeout,
            UpstreamError::NotConfigured(msg) => ApiError::Unavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<FinderError> for ApiError {
    fn from(err: FinderError) -> Self {
        match err {
            FinderError::Upstream(e) => e.into(),
            FinderError::NoActivities { raw_response } => {
                ApiError::ParseFailed { raw_response }
            }
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFields(_)
            | ApiError::InvalidInput(_)
            | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ParseFailed { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(self) -> ErrorResponse {
        match self {
            ApiError::MissingFields(fields) => ErrorResponse {
                error: "Missing required fields".to_string(),
                message: None,
                required: Some(fields.into_iter().map(String::from).collect()),
                raw_response: None,
            },
            ApiError::InvalidInput(msg) => ErrorResponse::new("Invalid input", msg),
            ApiError::InvalidBody(msg) => {
                ErrorResponse::new("Invalid request body", msg)
            }
            ApiError::Unauthorized => ErrorResponse::new(
                "Invalid API key",
                "Please check the GOOGLE_API_KEY (or OPENAI_API_KEY) environment variable",
            ),
            ApiError::RateLimited { .. } => ErrorResponse::new(
                "Rate limit exceeded",
                "Please try again in a moment",
            ),
            ApiError::Timeout => ErrorResponse::new(
                "Upstream timeout",
                "The activity search took too long, please try again",
            ),
            ApiError::Unavailable(msg) => {
                ErrorResponse::new("Service unavailable", msg)
            }
            ApiError::ParseFailed { raw_response } => ErrorResponse {
                error: "Failed to parse activities from model response"
                    .to_string(),
                message: None,
                required: None,
                raw_response: Some(raw_response),
            },
            ApiError::Internal(msg) => {
                ErrorResponse::new("Internal server error", msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(?self, "Activity request failed");
        }
        let retry_after = match &self {
            ApiError::RateLimited {
                retry_after_secs: Some(secs),
            } => HeaderValue::from_str(&secs.to_string()).ok(),
            _ => None,
        };

        let mut response = (status, Json(self.body())).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
