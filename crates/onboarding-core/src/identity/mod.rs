//! Identity Verification Sub-flow
//!
//! Two interchangeable ways to prove control of the session email, both
//! ending in the same [`Event::IdentityConfirmed`] so the engine never sees
//! which one was used:
//!
//! - **Code**: a short numeric code delivered through a [`NotificationSink`]
//! - **OAuth**: an assertion resolved by an external [`IdentityProvider`]

pub mod code;
mod mock;

pub use mock::{MemoryNotificationSink, StaticIdentityProvider};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::{after, OnboardingConfig};
use crate::engine::{self, Event};
use crate::error::{bounded, CapabilityError, OnboardingError, Result};
use crate::session::{
    normalize_email, normalize_name, CodeState, IdentityMethod, OnboardingSession, Profile,
    SessionToken, Stage,
};
use crate::store::{load_mutable, SessionStore};

/// Identity returned by an OAuth provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub email: String,
    pub email_verified: bool,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

/// External identity provider (Google, etc.)
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange a client-supplied assertion (authorization code, ID token)
    /// for a verified identity
    async fn resolve(&self, assertion: &str) -> std::result::Result<VerifiedIdentity, CapabilityError>;

    /// Provider name, for logs
    fn name(&self) -> &str;
}

/// Outbound messages to the person onboarding
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    VerificationCode {
        email: String,
        code: String,
        expires_in_minutes: u64,
    },
    Welcome {
        email: String,
        first_name: String,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Self::VerificationCode { email, .. } | Self::Welcome { email, .. } => email,
        }
    }
}

/// Delivery channel for notifications (email, SMS)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> std::result::Result<(), CapabilityError>;
}

/// Proof of identity, discriminated by `method`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum IdentityProof {
    Code {
        code: String,
        first_name: String,
        last_name: String,
        password: String,
    },
    #[serde(rename = "oauth")]
    OAuth { assertion: String },
}

/// Issues codes and applies identity proofs to sessions
#[derive(Clone)]
pub struct IdentityFlow {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: OnboardingConfig,
}

impl IdentityFlow {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: OnboardingConfig,
    ) -> Self {
        Self {
            store,
            provider,
            sink,
            clock,
            config,
        }
    }

    /// Issue a verification code to the session email. Returns how long the
    /// client must wait before asking again.
    pub async fn issue_code(&self, token: &SessionToken) -> Result<Duration> {
        let now = self.clock.now();
        let mut session = load_mutable(self.store.as_ref(), token, now).await?;

        if let Some(until) = session.code.locked_until.filter(|until| now < *until) {
            return Err(OnboardingError::TooManyAttempts {
                retry_after: (until - now).to_std().unwrap_or_default(),
            });
        }
        if let Some(sent) = session.code.last_sent_at {
            let ready_at = after(sent, self.config.code_resend_cooldown);
            if now < ready_at {
                return Err(OnboardingError::RateLimited {
                    retry_after: (ready_at - now).to_std().unwrap_or_default(),
                });
            }
        }

        engine::apply(&mut session, Event::EmailSubmitted)?;

        let code = code::generate(self.config.code_length);
        let hash = code::hash_secret(&code)?;

        // Deliver before persisting: a failed dispatch leaves the session as it was
        let notification = Notification::VerificationCode {
            email: session.email.clone(),
            code,
            expires_in_minutes: self.config.code_ttl.as_secs() / 60,
        };
        bounded(self.config.capability_timeout, self.sink.send(&notification))
            .await
            .inspect_err(|e| tracing::warn!(session_id = %session.id, error = %e, "verification code dispatch failed"))?;

        session.code = CodeState {
            hash: Some(hash),
            expires_at: Some(after(now, self.config.code_ttl)),
            last_sent_at: Some(now),
            attempts: 0,
            locked_until: None,
        };
        session.updated_at = now;
        let session = self.store.update(&session).await?;

        tracing::info!(session_id = %session.id, stage = %session.stage, "verification code issued");
        Ok(self.config.code_resend_cooldown)
    }

    /// Apply an identity proof; on success the session is `identity_verified`
    pub async fn verify(&self, token: &SessionToken, proof: IdentityProof) -> Result<Stage> {
        match proof {
            IdentityProof::Code {
                code,
                first_name,
                last_name,
                password,
            } => {
                let profile = Profile {
                    first_name: normalize_name("first_name", &first_name)?,
                    last_name: normalize_name("last_name", &last_name)?,
                };
                code::validate_password(&password)?;
                self.verify_code(token, &code, profile, &password).await
            }
            IdentityProof::OAuth { assertion } => self.verify_oauth(token, &assertion).await,
        }
    }

    async fn verify_code(
        &self,
        token: &SessionToken,
        submitted: &str,
        profile: Profile,
        password: &str,
    ) -> Result<Stage> {
        let now = self.clock.now();
        let mut session = load_mutable(self.store.as_ref(), token, now).await?;
        engine::advance(&session, Event::IdentityConfirmed)?;

        if let Some(until) = session.code.locked_until.filter(|until| now < *until) {
            return Err(OnboardingError::TooManyAttempts {
                retry_after: (until - now).to_std().unwrap_or_default(),
            });
        }
        let (Some(hash), Some(expires_at)) = (session.code.hash.clone(), session.code.expires_at) else {
            return Err(OnboardingError::InvalidCode);
        };
        if now > expires_at {
            return Err(OnboardingError::InvalidCode);
        }

        if !code::verify_secret(submitted.trim(), &hash) {
            return Err(self.record_wrong_code(session, now).await);
        }

        let password_hash = code::hash_secret(password)?;
        engine::apply(&mut session, Event::IdentityConfirmed)?;
        session.email_verified = true;
        session.identity_method = Some(IdentityMethod::Code);
        session.profile = Some(profile);
        session.password_hash = Some(password_hash);
        session.code = CodeState::default();
        session.updated_at = now;
        let session = self.store.update(&session).await?;

        tracing::info!(session_id = %session.id, method = "code", "identity verified");
        Ok(session.stage)
    }

    /// Count a wrong code, locking the code out once the budget is spent
    async fn record_wrong_code(
        &self,
        mut session: OnboardingSession,
        now: chrono::DateTime<chrono::Utc>,
    ) -> OnboardingError {
        session.code.attempts += 1;
        let err = if session.code.attempts >= self.config.max_code_attempts {
            session.code = CodeState {
                locked_until: Some(after(now, self.config.code_lockout)),
                last_sent_at: session.code.last_sent_at,
                ..CodeState::default()
            };
            tracing::warn!(session_id = %session.id, "verification code locked out");
            OnboardingError::TooManyAttempts {
                retry_after: self.config.code_lockout,
            }
        } else {
            OnboardingError::InvalidCode
        };
        session.updated_at = now;

        match self.store.update(&session).await {
            Ok(_) => err,
            Err(store_err) => store_err,
        }
    }

    async fn verify_oauth(&self, token: &SessionToken, assertion: &str) -> Result<Stage> {
        let now = self.clock.now();
        let mut session = load_mutable(self.store.as_ref(), token, now).await?;

        // Stage check happens before the provider call; OAuth may skip the
        // code dispatch, so it walks through identity_pending in one write
        if session.stage == Stage::PlanSelected {
            engine::apply(&mut session, Event::EmailSubmitted)?;
        }
        engine::apply(&mut session, Event::IdentityConfirmed)?;

        let identity = bounded(self.config.capability_timeout, self.provider.resolve(assertion))
            .await
            .map_err(|e| match e {
                CapabilityError::Rejected(reason) => {
                    tracing::warn!(session_id = %session.id, provider = self.provider.name(), %reason, "oauth assertion rejected");
                    OnboardingError::IdentityMismatch
                }
                other => other.into(),
            })?;

        let email_matches = normalize_email(&identity.email).is_ok_and(|email| email == session.email);
        if !identity.email_verified || !email_matches {
            tracing::warn!(session_id = %session.id, provider = self.provider.name(), "oauth identity does not match session email");
            return Err(OnboardingError::IdentityMismatch);
        }

        let fallback = session.email.split('@').next().unwrap_or_default().to_string();
        session.email_verified = true;
        session.identity_method = Some(IdentityMethod::OAuth);
        session.profile = Some(Profile {
            first_name: identity.given_name.unwrap_or(fallback),
            last_name: identity.family_name.unwrap_or_default(),
        });
        session.code = CodeState::default();
        session.updated_at = now;
        let session = self.store.update(&session).await?;

        tracing::info!(session_id = %session.id, method = "oauth", provider = self.provider.name(), "identity verified");
        Ok(session.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::plan::PlanCatalog;
    use crate::store::MemoryBackend;

    struct Fixture {
        flow: IdentityFlow,
        store: MemoryBackend,
        sink: Arc<MemoryNotificationSink>,
        clock: Arc<ManualClock>,
        token: SessionToken,
    }

    async fn fixture(provider: StaticIdentityProvider) -> Fixture {
        let store = MemoryBackend::new();
        let sink = Arc::new(MemoryNotificationSink::new());
        let clock = Arc::new(ManualClock::default());
        let config = OnboardingConfig {
            capability_timeout: Duration::from_millis(50),
            ..OnboardingConfig::default()
        };

        let session = OnboardingSession::new(
            "jane@example.com".into(),
            PlanCatalog::standard().get("free").unwrap(),
            clock.now(),
            config.session_ttl,
        );
        store.create(&session, clock.now()).await.unwrap();

        let flow = IdentityFlow::new(
            Arc::new(store.clone()),
            Arc::new(provider),
            sink.clone(),
            clock.clone(),
            config,
        );
        Fixture {
            flow,
            store,
            sink,
            clock,
            token: session.token,
        }
    }

    fn code_proof(code: &str) -> IdentityProof {
        IdentityProof::Code {
            code: code.into(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            password: "correct-horse".into(),
        }
    }

    fn google(email: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            email: email.into(),
            email_verified: true,
            given_name: Some("Jane".into()),
            family_name: Some("Doe".into()),
        }
    }

    #[tokio::test]
    async fn test_code_path_verifies_identity() {
        let f = fixture(StaticIdentityProvider::new()).await;
        f.flow.issue_code(&f.token).await.unwrap();
        let code = f.sink.last_code_for("jane@example.com").unwrap();

        let stage = f.flow.verify(&f.token, code_proof(&code)).await.unwrap();
        assert_eq!(stage, Stage::IdentityVerified);

        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert!(stored.email_verified);
        assert_eq!(stored.identity_method, Some(IdentityMethod::Code));
        assert!(stored.code.hash.is_none());
        assert!(stored.password_hash.is_some());
    }

    #[tokio::test]
    async fn test_resend_cooldown() {
        let f = fixture(StaticIdentityProvider::new()).await;
        f.flow.issue_code(&f.token).await.unwrap();
        assert!(matches!(
            f.flow.issue_code(&f.token).await,
            Err(OnboardingError::RateLimited { .. })
        ));

        f.clock.advance(chrono::Duration::minutes(3));
        f.flow.issue_code(&f.token).await.unwrap();
        assert_eq!(f.sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_wrong_codes_lock_out() {
        let f = fixture(StaticIdentityProvider::new()).await;
        f.flow.issue_code(&f.token).await.unwrap();
        let code = f.sink.last_code_for("jane@example.com").unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..4 {
            assert_eq!(
                f.flow.verify(&f.token, code_proof(wrong)).await,
                Err(OnboardingError::InvalidCode)
            );
        }
        assert!(matches!(
            f.flow.verify(&f.token, code_proof(wrong)).await,
            Err(OnboardingError::TooManyAttempts { .. })
        ));

        // Even the right code is refused during the lockout
        assert!(matches!(
            f.flow.verify(&f.token, code_proof(&code)).await,
            Err(OnboardingError::TooManyAttempts { .. })
        ));
        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::IdentityPending);
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let f = fixture(StaticIdentityProvider::new()).await;
        f.flow.issue_code(&f.token).await.unwrap();
        let code = f.sink.last_code_for("jane@example.com").unwrap();

        f.clock.advance(chrono::Duration::minutes(16));
        assert_eq!(
            f.flow.verify(&f.token, code_proof(&code)).await,
            Err(OnboardingError::InvalidCode)
        );
    }

    #[tokio::test]
    async fn test_sink_failure_leaves_session_unchanged() {
        let f = fixture(StaticIdentityProvider::new()).await;
        f.sink.set_failing(true);
        assert!(matches!(
            f.flow.issue_code(&f.token).await,
            Err(OnboardingError::ExternalCapabilityUnavailable(_))
        ));
        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::PlanSelected);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_oauth_path_from_plan_selected() {
        let provider = StaticIdentityProvider::new().with_identity("good", google("Jane@Example.com"));
        let f = fixture(provider).await;

        let proof = IdentityProof::OAuth { assertion: "good".into() };
        assert_eq!(f.flow.verify(&f.token, proof).await.unwrap(), Stage::IdentityVerified);

        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.identity_method, Some(IdentityMethod::OAuth));
        assert_eq!(stored.profile.unwrap().first_name, "Jane");
    }

    #[tokio::test]
    async fn test_oauth_email_mismatch_fails_closed() {
        let provider = StaticIdentityProvider::new().with_identity("other", google("mallory@example.com"));
        let f = fixture(provider).await;

        let proof = IdentityProof::OAuth { assertion: "other".into() };
        assert_eq!(f.flow.verify(&f.token, proof).await, Err(OnboardingError::IdentityMismatch));

        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::PlanSelected);
        assert!(!stored.email_verified);
    }

    #[tokio::test]
    async fn test_oauth_timeout_leaves_session_unchanged() {
        let provider = StaticIdentityProvider::new()
            .with_identity("slow", google("jane@example.com"))
            .with_delay(Duration::from_secs(5));
        let f = fixture(provider).await;

        let proof = IdentityProof::OAuth { assertion: "slow".into() };
        assert!(matches!(
            f.flow.verify(&f.token, proof).await,
            Err(OnboardingError::ExternalCapabilityUnavailable(_))
        ));
        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.version, 0);
    }

    #[test]
    fn test_proof_discriminant() {
        let proof: IdentityProof =
            serde_json::from_str(r#"{"method":"oauth","assertion":"abc"}"#).unwrap();
        assert_eq!(proof, IdentityProof::OAuth { assertion: "abc".into() });
    }
}
