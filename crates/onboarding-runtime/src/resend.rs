//! Resend E-mail Sink
//!
//! Implementation of `NotificationSink` over the Resend HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use onboarding_core::{CapabilityError, Notification, NotificationSink};
use serde::{Deserialize, Serialize};

use crate::error::{status_error, Result, RuntimeError};
use crate::sink::render;

const DEFAULT_API_URL: &str = "https://api.resend.com";

/// Resend configuration
#[derive(Clone, Debug)]
pub struct ResendConfig {
    pub api_key: String,
    /// Sender, e.g. `Onboarding <hello@example.com>`
    pub from: String,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl ResendConfig {
    /// Read `RESEND_API_KEY` and `RESEND_FROM`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("RESEND_API_KEY")
            .map_err(|_| RuntimeError::Config("RESEND_API_KEY not set".into()))?;
        let from = std::env::var("RESEND_FROM")
            .map_err(|_| RuntimeError::Config("RESEND_FROM not set".into()))?;

        Ok(Self {
            api_key,
            from,
            api_url: DEFAULT_API_URL.into(),
            timeout_secs: 10,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: String,
}

/// Sends notifications as e-mail through Resend
pub struct ResendNotifier {
    http: reqwest::Client,
    config: ResendConfig,
}

impl ResendNotifier {
    pub fn new(config: ResendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ResendConfig::from_env()?)
    }

    async fn deliver(&self, notification: &Notification) -> Result<String> {
        let rendered = render(notification);
        let body = SendEmail {
            from: &self.config.from,
            to: [notification.recipient()],
            subject: &rendered.subject,
            text: &rendered.text,
        };

        let response = self
            .http
            .post(format!("{}/emails", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let sent: SendEmailResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))?;
        Ok(sent.id)
    }
}

#[async_trait]
impl NotificationSink for ResendNotifier {
    async fn send(&self, notification: &Notification) -> std::result::Result<(), CapabilityError> {
        match self.deliver(notification).await {
            Ok(message_id) => {
                tracing::debug!(%message_id, "e-mail accepted by resend");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "resend delivery failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = SendEmail {
            from: "Onboarding <hello@example.com>",
            to: ["jane@example.com"],
            subject: "Hi",
            text: "Hello",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["to"][0], "jane@example.com");
        assert_eq!(json["from"], "Onboarding <hello@example.com>");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_unavailable() {
        let notifier = ResendNotifier::new(ResendConfig {
            api_key: "re_test".into(),
            from: "hello@example.com".into(),
            api_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
        })
        .unwrap();
        let result = notifier
            .send(&Notification::Welcome {
                email: "jane@example.com".into(),
                first_name: "Jane".into(),
            })
            .await;
        assert!(matches!(result, Err(CapabilityError::Unavailable(_))));
    }
}
