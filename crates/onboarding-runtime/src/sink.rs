//! Development capabilities and message rendering

use async_trait::async_trait;
use onboarding_core::session::mask_email;
use onboarding_core::{CapabilityError, IdentityProvider, Notification, NotificationSink, VerifiedIdentity};

/// Rendered e-mail
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub text: String,
}

/// Plain-text rendering shared by every e-mail sink
pub fn render(notification: &Notification) -> Rendered {
    match notification {
        Notification::VerificationCode {
            code,
            expires_in_minutes,
            ..
        } => Rendered {
            subject: format!("Your verification code is {code}"),
            text: format!(
                "Use {code} to verify your email address. The code expires in {expires_in_minutes} minutes.\n\n\
                 If you did not start signing up, you can ignore this message."
            ),
        },
        Notification::Welcome { first_name, .. } => {
            let greeting = if first_name.is_empty() {
                "Welcome aboard!".to_string()
            } else {
                format!("Welcome aboard, {first_name}!")
            };
            Rendered {
                subject: "Your workspace is ready".into(),
                text: format!("{greeting}\n\nYour account, workspace and business have been created."),
            }
        }
    }
}

/// Logs notifications instead of sending them. Codes are never written to
/// the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<(), CapabilityError> {
        let kind = match notification {
            Notification::VerificationCode { .. } => "verification_code",
            Notification::Welcome { .. } => "welcome",
        };
        tracing::info!(
            kind,
            recipient = %mask_email(notification.recipient()),
            "notification suppressed (no e-mail provider configured)"
        );
        Ok(())
    }
}

/// Used when no OAuth provider is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredIdentityProvider;

#[async_trait]
impl IdentityProvider for UnconfiguredIdentityProvider {
    async fn resolve(&self, _assertion: &str) -> Result<VerifiedIdentity, CapabilityError> {
        Err(CapabilityError::Unavailable("no OAuth provider configured".into()))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}
