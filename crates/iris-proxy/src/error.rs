use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use iris_protocol::TranslateError;
use serde_json::json;
use thiserror::Error;

/// Failures surfaced to the caller of `/v1/messages`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream returned {status} with an empty body")]
    UpstreamStatus { status: u16 },

    #[error("failed to encode upstream request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidBody(_) | ProxyError::Translate(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) | ProxyError::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
