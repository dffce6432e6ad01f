use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;

/// Failures of a single analysis round trip to the remote provider.
///
/// Every variant is terminal: the dispatcher never retries.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// No credential configured
    #[error("provider credential is not configured")]
    MissingCredential,
    /// End-to-end deadline expired
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),
    /// Connection or transport failure
    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Provider answered with a non-success status
    #[error("upstream error ({status}): {body}")]
    Upstream { status: StatusCode, body: String },
    /// Response body exceeded the configured cap
    #[error("response body exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
    /// Malformed body, zero choices or empty content
    #[error("no usable content in provider response: {0}")]
    NoContent(String),
}

impl AnalysisError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Upstream { .. } => "upstream",
            Self::ResponseTooLarge { .. } => "response_too_large",
            Self::NoContent(_) => "no_content",
        }
    }
}

/// Errors raised while building an [`crate::service::AnalysisService`]
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("analysis service must be created inside a tokio runtime")]
    NoRuntime,
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Errors surfaced by the ingestion API
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Request body failed validation
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// Internal server error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::BadRequest(_) => "bad_request",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::BadRequest("unknown level".to_string());
        assert_eq!(error.to_string(), "Bad request: unknown level");

        let error = AnalysisError::Upstream {
            status: StatusCode::BAD_GATEWAY,
            body: "oops".to_string(),
        };
        assert_eq!(error.to_string(), "upstream error (502 Bad Gateway): oops");
    }

    #[test]
    fn test_analysis_error_kind() {
        assert_eq!(AnalysisError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(AnalysisError::NoContent("empty".into()).kind(), "no_content");
        assert_eq!(
            AnalysisError::ResponseTooLarge { limit: 10 }.kind(),
            "response_too_large"
        );
    }

    #[tokio::test]
    async fn test_error_response() {
        let error = AppError::BadRequest("invalid level".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
