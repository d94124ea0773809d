//! Google Identity Provider
//!
//! Implementation of `IdentityProvider` for "Sign in with Google". The
//! client completes the consent screen and posts back the authorization
//! code; the server exchanges it and reads the OpenID userinfo.

use std::time::Duration;

use async_trait::async_trait;
use onboarding_core::{CapabilityError, IdentityProvider, VerifiedIdentity};
use serde::Deserialize;

use crate::error::{status_error, Result, RuntimeError};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Google OAuth client configuration
#[derive(Clone, Debug)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl GoogleConfig {
    /// Read `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `GOOGLE_REDIRECT_URI`
    pub fn from_env() -> Result<Self> {
        let var = |key: &str| {
            std::env::var(key).map_err(|_| RuntimeError::Config(format!("{key} not set")))
        };

        Ok(Self {
            client_id: var("GOOGLE_CLIENT_ID")?,
            client_secret: var("GOOGLE_CLIENT_SECRET")?,
            redirect_uri: var("GOOGLE_REDIRECT_URI")?,
            timeout_secs: 10,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    given_name: Option<String>,
    family_name: Option<String>,
}

impl UserInfo {
    fn into_identity(self) -> Result<VerifiedIdentity> {
        let email = self
            .email
            .ok_or_else(|| RuntimeError::InvalidResponse("userinfo has no email".into()))?;
        Ok(VerifiedIdentity {
            email,
            email_verified: self.email_verified,
            given_name: self.given_name,
            family_name: self.family_name,
        })
    }
}

/// Google OAuth identity provider
pub struct GoogleIdentityProvider {
    http: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleIdentityProvider {
    pub fn new(config: GoogleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GoogleConfig::from_env()?)
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn userinfo(&self, access_token: &str) -> Result<VerifiedIdentity> {
        let response = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        response
            .json::<UserInfo>()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))?
            .into_identity()
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn resolve(&self, assertion: &str) -> std::result::Result<VerifiedIdentity, CapabilityError> {
        let access_token = self.exchange_code(assertion).await.inspect_err(|e| {
            tracing::warn!(error = %e, "google code exchange failed");
        })?;
        let identity = self.userinfo(&access_token).await?;
        tracing::debug!(email_verified = identity.email_verified, "google identity resolved");
        Ok(identity)
    }

    fn name(&self) -> &str {
        "google"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_userinfo_maps_to_identity() {
        let info: UserInfo = serde_json::from_str(
            r#"{"sub":"1","email":"jane@example.com","email_verified":true,"given_name":"Jane","family_name":"Doe","picture":"x"}"#,
        )
        .unwrap();
        let identity = info.into_identity().unwrap();
        assert_eq!(identity.email, "jane@example.com");
        assert!(identity.email_verified);
        assert_eq!(identity.given_name.as_deref(), Some("Jane"));
    }

    #[test]
    fn test_userinfo_without_email_is_invalid() {
        let info: UserInfo = serde_json::from_str(r#"{"sub":"1"}"#).unwrap();
        assert!(matches!(info.into_identity(), Err(RuntimeError::InvalidResponse(_))));
    }

    #[test]
    fn test_provider_builds_from_config() {
        let provider = GoogleIdentityProvider::new(GoogleConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://app.test/oauth".into(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(provider.name(), "google");
    }
}
