use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

/// Every way an analysis request can fail. Each variant aborts the request.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("image exceeds the {max} byte limit")]
    ImageTooLarge { max: usize },
    #[error("image processing failed: {0}")]
    ImageProcessing(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream rate limit: {0}")]
    RateLimited(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("could not parse model reply: {0}")]
    Parse(String),
}

impl AnalyzeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingInput(_) | Self::ImageProcessing(_) => StatusCode::BAD_REQUEST,
            Self::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration(_) | Self::Upstream(_) | Self::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing message. Never includes upstream bodies or internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "No image file provided",
            Self::ImageTooLarge { .. } => "Image file is too large",
            Self::ImageProcessing(_) => "Could not process image",
            Self::Configuration(_) => "Server configuration error",
            Self::RateLimited(_) => "Rate limit exceeded. Please try again later.",
            Self::Upstream(_) | Self::Parse(_) => "Failed to analyze image",
        }
    }

    /// Renders the error body; `details` is only attached outside production.
    pub fn into_response_with(self, expose_details: bool) -> Response {
        let body = ErrorBody {
            error: self.public_message(),
            details: expose_details.then(|| self.to_string()),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AnalyzeError::MissingInput("image".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AnalyzeError::ImageTooLarge { max: 10 }.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AnalyzeError::ImageProcessing("bad header".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AnalyzeError::Configuration("no key".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AnalyzeError::RateLimited("429".into()).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AnalyzeError::Upstream("502".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AnalyzeError::Parse("yaml".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn production_hides_details() {
        let response = AnalyzeError::Upstream("status=503 body=internal trace".into()).into_response_with(false);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Failed to analyze image");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn development_includes_details() {
        let response = AnalyzeError::Parse("did not find expected key".into()).into_response_with(true);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["details"], "could not parse model reply: did not find expected key");
    }
}
