//! Error Types

use std::time::Duration;

use thiserror::Error;

use crate::engine::Event;
use crate::session::Stage;

/// Result type alias for onboarding operations
pub type Result<T> = std::result::Result<T, OnboardingError>;

/// Onboarding error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OnboardingError {
    /// Event is not legal for the session's current stage
    #[error("Event {event} is not valid in stage {stage}")]
    InvalidTransition { stage: Stage, event: Event },

    /// Session is expired, absent, or the token is wrong
    #[error("Onboarding session not found")]
    SessionNotFound,

    /// Session was already converted into permanent records
    #[error("Onboarding session already committed")]
    SessionAlreadyCommitted,

    /// Proven identity does not match the session email
    #[error("Identity does not match the onboarding email")]
    IdentityMismatch,

    /// Identity or payment provider call failed or timed out
    #[error("External capability unavailable: {0}")]
    ExternalCapabilityUnavailable(String),

    /// Another writer changed the session between read and write
    #[error("Onboarding session was modified concurrently")]
    ConcurrentModification,

    /// Request field failed validation
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Selected plan does not exist in the catalog
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    /// Verification code is wrong, expired or was never issued
    #[error("Invalid or expired verification code")]
    InvalidCode,

    /// Too many wrong verification codes
    #[error("Too many verification attempts, retry in {}s", retry_after.as_secs())]
    TooManyAttempts { retry_after: Duration },

    /// Operation repeated too quickly
    #[error("Rate limited, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Commit rolled back
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl OnboardingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if the client can retry the same request
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalCapabilityUnavailable(_)
                | Self::ConcurrentModification
                | Self::RateLimited { .. }
                | Self::TooManyAttempts { .. }
                | Self::CommitFailed(_)
                | Self::Storage(_)
        )
    }

    /// Seconds the client should wait before retrying, when known
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::TooManyAttempts { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Stable machine-readable code
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionAlreadyCommitted => "SESSION_ALREADY_COMMITTED",
            Self::IdentityMismatch => "IDENTITY_MISMATCH",
            Self::ExternalCapabilityUnavailable(_) => "CAPABILITY_UNAVAILABLE",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::PlanNotFound(_) => "PLAN_NOT_FOUND",
            Self::InvalidCode => "INVALID_CODE",
            Self::TooManyAttempts { .. } => "TOO_MANY_ATTEMPTS",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::CommitFailed(_) => "COMMIT_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Convert to a client-safe message
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidTransition { stage, .. } => {
                format!("This step is not available while onboarding is {stage}. Refresh and try again.")
            }
            Self::SessionNotFound => "Onboarding session not found or expired.".into(),
            Self::SessionAlreadyCommitted => "This onboarding session is already complete.".into(),
            Self::IdentityMismatch => "The verified account does not match the onboarding email.".into(),
            Self::ExternalCapabilityUnavailable(_) => {
                "A required service is temporarily unavailable. Please try again.".into()
            }
            Self::ConcurrentModification => "The session changed while saving. Please retry.".into(),
            Self::Validation { field, message } => format!("{field} {message}"),
            Self::PlanNotFound(_) => "Selected plan not found.".into(),
            Self::InvalidCode => "Invalid or expired verification code.".into(),
            Self::TooManyAttempts { .. } => "Too many attempts. Please wait before trying again.".into(),
            Self::RateLimited { .. } => "Please wait before trying again.".into(),
            Self::CommitFailed(_) | Self::Storage(_) => "An unexpected error occurred.".into(),
        }
    }
}

/// Failures reported by external capabilities (identity provider,
/// notification sink, payment gateway)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Provider could not be reached or answered with a server error
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the request (bad assertion, bad signature, bad payload)
    #[error("rejected: {0}")]
    Rejected(String),

    /// Call exceeded the configured timeout
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl From<CapabilityError> for OnboardingError {
    fn from(err: CapabilityError) -> Self {
        Self::ExternalCapabilityUnavailable(err.to_string())
    }
}

/// Bound an external call by `limit`, reporting an elapsed timer as
/// [`CapabilityError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> std::result::Result<T, CapabilityError>
where
    F: std::future::Future<Output = std::result::Result<T, CapabilityError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| CapabilityError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OnboardingError::ConcurrentModification.is_retryable());
        assert!(OnboardingError::ExternalCapabilityUnavailable("x".into()).is_retryable());
        assert!(!OnboardingError::SessionAlreadyCommitted.is_retryable());
        assert!(!OnboardingError::IdentityMismatch.is_retryable());
    }

    #[test]
    fn test_capability_error_maps_to_unavailable() {
        let err: OnboardingError = CapabilityError::Timeout(Duration::from_millis(250)).into();
        assert_eq!(err.code(), "CAPABILITY_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: std::result::Result<(), _> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(CapabilityError::Timeout(Duration::from_millis(10))));
    }
}
