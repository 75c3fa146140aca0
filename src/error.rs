//! Error types for the proxy.
//!
//! [`ProxyError`] covers startup and configuration failures, [`UpstreamError`]
//! classifies what went wrong talking to the Messages API, and [`GatewayError`]
//! is the per-call outcome that becomes an `OpenAI` error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::translate::openai_types::ChatErrorResponse;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failure talking to the Messages API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// 401, or an `authentication_error` event mid-stream. Recoverable once by
    /// refreshing the credential.
    #[error("upstream rejected the credential: {message}")]
    Unauthorized { message: String },

    #[error("upstream rate limited: {message}")]
    RateLimited { message: String },

    #[error("upstream returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("malformed upstream payload: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Classify an HTTP error status and its body message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized { message },
            429 => Self::RateLimited { message },
            _ => Self::Api { status, message },
        }
    }

    /// Classify an `error` event received in the middle of a stream.
    pub fn from_stream_error(error_type: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match error_type {
            "authentication_error" => Self::Unauthorized { message },
            "rate_limit_error" => Self::RateLimited { message },
            "overloaded_error" => Self::Api {
                status: 529,
                message,
            },
            "invalid_request_error" => Self::Api {
                status: 400,
                message,
            },
            _ => Self::Api {
                status: 500,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Terminal outcome of one inbound call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("No upstream credential configured. Add one to the config file or log in with `claude`.")]
    NotConfigured,

    #[error("Missing Authorization header")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Invalid JSON in request body: {0}")]
    InvalidJson(String),

    #[error("{0}")]
    RateLimited(String),

    /// The upstream still rejected us after the one permitted refresh.
    #[error("Invalid Anthropic API key")]
    UpstreamAuth,

    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::MissingApiKey | Self::InvalidApiKey | Self::UpstreamAuth => StatusCode::UNAUTHORIZED,
            Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Internal(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotConfigured | Self::MissingApiKey | Self::InvalidJson(_) => {
                "invalid_request_error"
            }
            Self::InvalidApiKey | Self::UpstreamAuth => "authentication_error",
            Self::RateLimited(_) => "rate_limit_error",
            Self::Upstream { .. } | Self::Internal(_) => "api_error",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidApiKey | Self::UpstreamAuth => "invalid_api_key",
            Self::InvalidJson(_) => "invalid_json",
            Self::RateLimited(_) => "rate_limit_exceeded",
            Self::Upstream { .. } => "anthropic_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn to_envelope(&self) -> ChatErrorResponse {
        ChatErrorResponse::new(self.error_type(), self.code(), self.to_string())
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Unauthorized { .. } => Self::UpstreamAuth,
            UpstreamError::RateLimited { message } => Self::RateLimited(message),
            UpstreamError::Api { status, message } => Self::Upstream { status, message },
            UpstreamError::Transport(msg) | UpstreamError::Decode(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_mapping() {
        let cases = [
            (GatewayError::NotConfigured, 503, "not_configured"),
            (GatewayError::MissingApiKey, 401, "missing_api_key"),
            (GatewayError::InvalidApiKey, 401, "invalid_api_key"),
            (GatewayError::InvalidJson("eof".into()), 400, "invalid_json"),
            (GatewayError::RateLimited("slow down".into()), 429, "rate_limit_exceeded"),
            (GatewayError::UpstreamAuth, 401, "invalid_api_key"),
            (
                GatewayError::Upstream {
                    status: 529,
                    message: "Overloaded".into(),
                },
                529,
                "anthropic_error",
            ),
            (GatewayError::Internal("reset".into()), 502, "internal_error"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status, "{err:?}");
            assert_eq!(err.to_envelope().error.code, code);
        }
    }

    #[test]
    fn test_rate_limit_message_passes_through() {
        let err: GatewayError = UpstreamError::from_status(429, "Number of requests exceeded").into();
        assert_eq!(err.to_envelope().error.message, "Number of requests exceeded");
        assert_eq!(err.error_type(), "rate_limit_error");
    }

    #[test]
    fn test_upstream_status_outside_error_range_becomes_bad_gateway() {
        let err = GatewayError::Upstream {
            status: 200,
            message: "odd".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_stream_error_classification() {
        assert!(UpstreamError::from_stream_error("authentication_error", "expired").is_auth());
        assert_eq!(
            UpstreamError::from_stream_error("overloaded_error", "busy"),
            UpstreamError::Api {
                status: 529,
                message: "busy".into()
            }
        );
    }
}
