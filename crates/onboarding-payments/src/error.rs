//! Payment Error Types

use onboarding_core::CapabilityError;
use stripe::WebhookError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Stripe API error
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Stripe(_))
    }
}

impl From<WebhookError> for PaymentError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::BadParse(_) => Self::WebhookParse(err.to_string()),
            other => Self::WebhookSignature(other.to_string()),
        }
    }
}

impl From<PaymentError> for CapabilityError {
    fn from(err: PaymentError) -> Self {
        if err.is_retryable() || matches!(err, PaymentError::Config(_)) {
            Self::Unavailable(err.to_string())
        } else {
            Self::Rejected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_errors_are_rejections() {
        let err: CapabilityError = PaymentError::WebhookSignature("bad".into()).into();
        assert!(matches!(err, CapabilityError::Rejected(_)));

        let err: CapabilityError = PaymentError::Stripe("down".into()).into();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
        assert!(PaymentError::Stripe("down".into()).is_retryable());

        let err: CapabilityError = PaymentError::Config("no key".into()).into();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
    }

    #[test]
    fn test_webhook_errors_split_parse_from_signature() {
        assert!(matches!(
            PaymentError::from(WebhookError::BadSignature),
            PaymentError::WebhookSignature(_)
        ));
        assert!(matches!(
            PaymentError::from(WebhookError::BadTimestamp(0)),
            PaymentError::WebhookSignature(_)
        ));

        let bad_json = serde_json::from_str::<u8>("{").unwrap_err();
        let err = PaymentError::from(WebhookError::BadParse(bad_json));
        assert!(matches!(err, PaymentError::WebhookParse(_)));
        assert!(!err.is_retryable());
        assert!(matches!(CapabilityError::from(err), CapabilityError::Rejected(_)));
    }
}
