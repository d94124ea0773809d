//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use onboarding_core::OnboardingError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Error returned by handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Onboarding(#[from] OnboardingError),

    /// Malformed request outside the JSON body (headers, query)
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Onboarding(err) => match err {
                OnboardingError::InvalidTransition { .. } => StatusCode::PRECONDITION_FAILED,
                OnboardingError::SessionNotFound => StatusCode::NOT_FOUND,
                OnboardingError::SessionAlreadyCommitted | OnboardingError::ConcurrentModification => {
                    StatusCode::CONFLICT
                }
                OnboardingError::IdentityMismatch => StatusCode::FORBIDDEN,
                OnboardingError::ExternalCapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                OnboardingError::Validation { .. }
                | OnboardingError::PlanNotFound(_)
                | OnboardingError::InvalidCode => StatusCode::BAD_REQUEST,
                OnboardingError::TooManyAttempts { .. } | OnboardingError::RateLimited { .. } => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                OnboardingError::CommitFailed(_) | OnboardingError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::BadRequest(message) => ErrorResponse {
                error: message.clone(),
                code: "BAD_REQUEST".into(),
                retry_after_secs: None,
            },
            Self::Onboarding(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, code = err.code(), "request failed");
                } else {
                    tracing::debug!(error = %err, code = err.code(), "request rejected");
                }
                ErrorResponse {
                    error: err.user_message(),
                    code: err.code().into(),
                    retry_after_secs: err.retry_after().map(|d| d.as_secs().max(1)),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (OnboardingError::SessionNotFound, StatusCode::NOT_FOUND),
            (OnboardingError::SessionAlreadyCommitted, StatusCode::CONFLICT),
            (OnboardingError::ConcurrentModification, StatusCode::CONFLICT),
            (OnboardingError::IdentityMismatch, StatusCode::FORBIDDEN),
            (OnboardingError::InvalidCode, StatusCode::BAD_REQUEST),
            (OnboardingError::ExternalCapabilityUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (OnboardingError::CommitFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
