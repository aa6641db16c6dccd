//! Error taxonomy for the proxy surface

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::session::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Base URL or credential missing
    #[error("{0}")]
    Configuration(String),

    /// Caller omitted a required parameter or sent an unusable body
    #[error("{0}")]
    BadRequest(String),

    /// Missing, invalid or expired session
    #[error("{0}")]
    Unauthenticated(String),

    /// One-time token never issued, already used, or expired
    #[error("Token not found or expired")]
    TokenNotFound,

    /// Upstream answered with a non-success status
    #[error("Moodle returned HTTP {status}")]
    Upstream { status: u16, detail: Value },

    /// Upstream could not be reached at all
    #[error("Error contacting Moodle at {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Too many requests, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Session storage unavailable: {0}")]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::TokenNotFound => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Connection { .. } => StatusCode::BAD_GATEWAY,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let detail = match &self {
            Self::Upstream { detail, .. } => detail.clone(),
            _ => Value::String(message.clone()),
        };

        if status.is_server_error() {
            tracing::error!("{}", message);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, message);
        }

        let mut response = (status, Json(json!({ "message": message, "detail": detail }))).into_response();
        if let Self::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
