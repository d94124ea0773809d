//! Runtime Error Types

use onboarding_core::CapabilityError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors from HTTP-backed capabilities
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Required environment variable missing
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure or provider 5xx
    #[error("Request failed: {0}")]
    Request(String),

    /// Provider refused the request (4xx)
    #[error("Provider rejected request: {0}")]
    Rejected(String),

    /// Provider answered with something we cannot read
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

impl From<RuntimeError> for CapabilityError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Rejected(_) => Self::Rejected(err.to_string()),
            RuntimeError::Config(_) | RuntimeError::Request(_) | RuntimeError::InvalidResponse(_) => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}

/// Classify a non-success status: client errors are rejections, everything
/// else is the provider being unavailable
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> RuntimeError {
    let detail = format!("{status}: {}", body.chars().take(200).collect::<String>());
    if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
        RuntimeError::Rejected(detail)
    } else {
        RuntimeError::Request(detail)
    }
}
