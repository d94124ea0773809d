//! Payment Bridge
//!
//! Starts hosted checkouts through a [`PaymentGateway`] and folds the
//! provider's asynchronous webhook notices back into sessions. Webhooks are
//! matched by checkout correlation id only; the provider never sees the
//! session token.

mod mock;

pub use mock::MockPaymentGateway;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::{after, OnboardingConfig};
use crate::engine::{self, Event};
use crate::error::{bounded, CapabilityError, OnboardingError, Result};
use crate::plan::{Plan, PlanCatalog};
use crate::session::{PaymentStatus, SessionToken, Stage};
use crate::store::{load_mutable, SessionStore};

/// Request to create a hosted checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Onboarding session id (not the token)
    pub session_id: String,

    /// Customer email
    pub email: String,

    /// Plan to purchase
    pub plan: Plan,

    /// URL to redirect after successful payment
    pub success_url: String,

    /// URL to redirect if checkout is cancelled
    pub cancel_url: String,

    /// Stable per session and attempt, so a retried create returns the same checkout
    pub idempotency_key: String,

    /// Echoed back by the provider on webhook events
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A checkout created by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub correlation_id: String,
    pub redirect_url: String,
}

/// What the client gets back from `initiate-payment`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLink {
    pub correlation_id: String,
    pub redirect_url: String,
    /// True when a still-pending checkout was handed back instead of a new one
    pub reused: bool,
}

/// Payment outcome carried by a webhook
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded {
        #[serde(default)]
        customer_ref: Option<String>,
        #[serde(default)]
        subscription_ref: Option<String>,
    },
    Failed {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Authenticated webhook notice, already parsed by the gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotice {
    pub correlation_id: String,
    #[serde(flatten)]
    pub outcome: PaymentOutcome,
}

/// How a webhook notice was absorbed. None of these are failures from the
/// provider's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Session changed; holds the resulting stage
    Applied(Stage),
    /// Notice repeats something already recorded
    Duplicate,
    /// Out-of-order notice that no longer applies
    Ignored,
    /// No session carries this correlation id
    NotFound,
}

/// External payment capability
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout for `request`
    async fn create_checkout(&self, request: CheckoutRequest) -> std::result::Result<Checkout, CapabilityError>;

    /// Verify the signature of a raw webhook body and parse it. `Ok(None)`
    /// means an authentic event that carries no payment outcome.
    fn parse_webhook(
        &self,
        payload: &str,
        signature: &str,
    ) -> std::result::Result<Option<PaymentNotice>, CapabilityError>;

    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Whether the gateway can actually take payments
    fn is_configured(&self) -> bool {
        true
    }
}

/// Idempotency key for the `sequence`-th checkout of a session
pub fn idempotency_key(session_id: &str, sequence: u32) -> String {
    format!("onboarding_checkout_{session_id}_{sequence}")
}

/// Connects sessions to the payment gateway
#[derive(Clone)]
pub struct PaymentBridge {
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: PlanCatalog,
    clock: Arc<dyn Clock>,
    config: OnboardingConfig,
}

impl PaymentBridge {
    pub fn new(
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: PlanCatalog,
        clock: Arc<dyn Clock>,
        config: OnboardingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            catalog,
            clock,
            config,
        }
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    /// Create (or reuse) a checkout for a session in `payment_pending`
    pub async fn initiate_checkout(
        &self,
        token: &SessionToken,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutLink> {
        let now = self.clock.now();
        let mut session = load_mutable(self.store.as_ref(), token, now).await?;
        engine::apply(&mut session, Event::CheckoutStarted)?;

        if session.payment_status == PaymentStatus::Pending {
            if let (Some(correlation_id), Some(redirect_url)) = (
                session.checkout_correlation_id.clone(),
                session.checkout.redirect_url.clone(),
            ) {
                tracing::debug!(session_id = %session.id, %correlation_id, "reusing pending checkout");
                return Ok(CheckoutLink {
                    correlation_id,
                    redirect_url,
                    reused: true,
                });
            }
        }

        let checkout = &mut session.checkout;
        let window_open = checkout
            .window_started_at
            .is_some_and(|started| now < after(started, self.config.checkout_window));
        if !window_open {
            checkout.window_started_at = Some(now);
            checkout.attempts = 0;
        }
        if checkout.attempts >= self.config.checkout_max_attempts {
            let reopens = after(checkout.window_started_at.unwrap_or(now), self.config.checkout_window);
            return Err(OnboardingError::RateLimited {
                retry_after: (reopens - now).to_std().unwrap_or_default(),
            });
        }
        if let Some(last) = checkout.last_created_at {
            let ready_at = after(last, self.config.checkout_min_interval);
            if now < ready_at {
                return Err(OnboardingError::RateLimited {
                    retry_after: (ready_at - now).to_std().unwrap_or_default(),
                });
            }
        }

        let plan = self.catalog.get(&session.selected_plan_id)?.clone();
        let sequence = session.checkout.sequence + 1;
        let request = CheckoutRequest {
            session_id: session.id.to_string(),
            email: session.email.clone(),
            idempotency_key: idempotency_key(session.id.as_str(), sequence),
            metadata: HashMap::from([
                ("onboarding_session_id".to_string(), session.id.to_string()),
                ("plan_id".to_string(), plan.id.clone()),
            ]),
            plan,
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
        };

        let created = bounded(self.config.capability_timeout, self.gateway.create_checkout(request))
            .await
            .inspect_err(|e| {
                tracing::warn!(session_id = %session.id, gateway = self.gateway.name(), error = %e, "checkout creation failed");
            })?;

        session.checkout.sequence = sequence;
        session.checkout.attempts += 1;
        session.checkout.last_created_at = Some(now);
        session.checkout.redirect_url = Some(created.redirect_url.clone());
        session.checkout_correlation_id = Some(created.correlation_id.clone());
        session.payment_status = PaymentStatus::Pending;
        session.updated_at = now;
        let session = self.store.update(&session).await?;

        tracing::info!(
            session_id = %session.id,
            correlation_id = %created.correlation_id,
            gateway = self.gateway.name(),
            "checkout created"
        );
        Ok(CheckoutLink {
            correlation_id: created.correlation_id,
            redirect_url: created.redirect_url,
            reused: false,
        })
    }

    /// Apply a verified webhook notice. Replays and unknown correlation ids
    /// are absorbed; only storage trouble is reported as an error.
    pub async fn handle_webhook(&self, notice: &PaymentNotice) -> Result<WebhookDisposition> {
        let correlation_id = notice.correlation_id.as_str();
        let mut attempt = 0;

        loop {
            let Some(mut session) = self.store.get_by_correlation_id(correlation_id).await? else {
                tracing::warn!(%correlation_id, "payment webhook for unknown checkout");
                return Ok(WebhookDisposition::NotFound);
            };
            if session.committed {
                tracing::info!(session_id = %session.id, %correlation_id, "payment webhook after commit");
                return Ok(WebhookDisposition::Duplicate);
            }

            // Applied regardless of expiry
            let event = match &notice.outcome {
                PaymentOutcome::Succeeded {
                    customer_ref,
                    subscription_ref,
                } => {
                    if session.payment_status == PaymentStatus::Succeeded {
                        tracing::debug!(session_id = %session.id, %correlation_id, "duplicate payment success");
                        return Ok(WebhookDisposition::Duplicate);
                    }
                    session.payment_status = PaymentStatus::Succeeded;
                    session.checkout.customer_ref.clone_from(customer_ref);
                    session.checkout.subscription_ref.clone_from(subscription_ref);
                    Event::PaymentSucceeded
                }
                PaymentOutcome::Failed { reason } => match session.payment_status {
                    PaymentStatus::Succeeded => {
                        tracing::info!(session_id = %session.id, %correlation_id, "payment failure after success ignored");
                        return Ok(WebhookDisposition::Ignored);
                    }
                    PaymentStatus::Failed => return Ok(WebhookDisposition::Duplicate),
                    PaymentStatus::None | PaymentStatus::Pending => {
                        tracing::warn!(session_id = %session.id, %correlation_id, reason = reason.as_deref().unwrap_or("unspecified"), "payment failed");
                        session.payment_status = PaymentStatus::Failed;
                        session.checkout.redirect_url = None;
                        Event::PaymentFailed
                    }
                },
            };

            match engine::apply(&mut session, event) {
                Ok(_) => {}
                Err(OnboardingError::InvalidTransition { stage, event }) => {
                    tracing::warn!(session_id = %session.id, %stage, %event, "payment webhook does not apply to session stage");
                    return Ok(WebhookDisposition::Ignored);
                }
                Err(OnboardingError::SessionAlreadyCommitted) => return Ok(WebhookDisposition::Duplicate),
                Err(e) => return Err(e),
            }
            session.updated_at = self.clock.now();

            match self.store.update(&session).await {
                Ok(written) => {
                    tracing::info!(session_id = %written.id, %correlation_id, stage = %written.stage, status = ?written.payment_status, "payment webhook applied");
                    return Ok(WebhookDisposition::Applied(written.stage));
                }
                Err(OnboardingError::ConcurrentModification) if attempt < self.config.webhook_retry_limit => {
                    attempt += 1;
                    tracing::debug!(%correlation_id, attempt, "payment webhook lost a write race, retrying");
                }
                Err(OnboardingError::SessionAlreadyCommitted) => return Ok(WebhookDisposition::Duplicate),
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::OnboardingSession;
    use crate::store::{MemoryBackend, RacingStore};
    use std::time::Duration;

    struct Fixture {
        bridge: PaymentBridge,
        store: MemoryBackend,
        gateway: Arc<MockPaymentGateway>,
        clock: Arc<ManualClock>,
        token: SessionToken,
    }

    async fn fixture(plan: &str, stage: Stage) -> Fixture {
        let store = MemoryBackend::new();
        let gateway = Arc::new(MockPaymentGateway::new("whsec_test"));
        let clock = Arc::new(ManualClock::default());
        let catalog = PlanCatalog::standard();
        let config = OnboardingConfig {
            capability_timeout: Duration::from_millis(50),
            ..OnboardingConfig::default()
        };

        let mut session = OnboardingSession::new(
            "jane@example.com".into(),
            catalog.get(plan).unwrap(),
            clock.now(),
            config.session_ttl,
        );
        session.stage = stage;
        store.create(&session, clock.now()).await.unwrap();

        let bridge = PaymentBridge::new(
            Arc::new(store.clone()),
            gateway.clone(),
            catalog,
            clock.clone(),
            config,
        );
        Fixture {
            bridge,
            store,
            gateway,
            clock,
            token: session.token,
        }
    }

    fn success(correlation_id: &str) -> PaymentNotice {
        PaymentNotice {
            correlation_id: correlation_id.into(),
            outcome: PaymentOutcome::Succeeded {
                customer_ref: Some("cus_1".into()),
                subscription_ref: Some("sub_1".into()),
            },
        }
    }

    fn failure(correlation_id: &str) -> PaymentNotice {
        PaymentNotice {
            correlation_id: correlation_id.into(),
            outcome: PaymentOutcome::Failed { reason: None },
        }
    }

    async fn checkout(f: &Fixture) -> CheckoutLink {
        f.bridge
            .initiate_checkout(&f.token, "https://app.test/ok", "https://app.test/cancel")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initiate_sets_pending_and_correlation() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let link = checkout(&f).await;
        assert!(!link.reused);

        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::PaymentPending);
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.checkout_correlation_id.as_deref(), Some(link.correlation_id.as_str()));

        let requests = f.gateway.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].idempotency_key, idempotency_key(stored.id.as_str(), 1));
    }

    #[tokio::test]
    async fn test_pending_checkout_is_reused() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let first = checkout(&f).await;
        let second = checkout(&f).await;
        assert!(second.reused);
        assert_eq!(first.correlation_id, second.correlation_id);
        assert_eq!(f.gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure_is_throttled() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let first = checkout(&f).await;
        f.bridge.handle_webhook(&failure(&first.correlation_id)).await.unwrap();

        let err = f
            .bridge
            .initiate_checkout(&f.token, "https://app.test/ok", "https://app.test/cancel")
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::RateLimited { .. }));

        f.clock.advance(chrono::Duration::seconds(31));
        let second = checkout(&f).await;
        assert_ne!(first.correlation_id, second.correlation_id);
    }

    #[tokio::test]
    async fn test_free_plan_cannot_checkout() {
        let f = fixture("free", Stage::ReadyToCommit).await;
        let err = f
            .bridge
            .initiate_checkout(&f.token, "https://app.test/ok", "https://app.test/cancel")
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_gateway_timeout_leaves_session_unchanged() {
        let f = fixture("pro", Stage::PaymentPending).await;
        f.gateway.set_delay(Some(Duration::from_secs(5)));
        let err = f
            .bridge
            .initiate_checkout(&f.token, "https://app.test/ok", "https://app.test/cancel")
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::ExternalCapabilityUnavailable(_)));

        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.version, 0);
        assert_eq!(stored.payment_status, PaymentStatus::None);
    }

    #[tokio::test]
    async fn test_success_webhook_is_idempotent() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let link = checkout(&f).await;

        let first = f.bridge.handle_webhook(&success(&link.correlation_id)).await.unwrap();
        assert_eq!(first, WebhookDisposition::Applied(Stage::ReadyToCommit));
        let once = f.store.get_by_token(&f.token).await.unwrap().unwrap();

        let replay = f.bridge.handle_webhook(&success(&link.correlation_id)).await.unwrap();
        assert_eq!(replay, WebhookDisposition::Duplicate);
        let twice = f.store.get_by_token(&f.token).await.unwrap().unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.checkout.subscription_ref.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_failure_after_success_is_ignored() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let link = checkout(&f).await;
        f.bridge.handle_webhook(&success(&link.correlation_id)).await.unwrap();

        let late = f.bridge.handle_webhook(&failure(&link.correlation_id)).await.unwrap();
        assert_eq!(late, WebhookDisposition::Ignored);
        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Succeeded);
        assert_eq!(stored.stage, Stage::ReadyToCommit);
    }

    #[tokio::test]
    async fn test_failure_keeps_payment_pending() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let link = checkout(&f).await;
        let outcome = f.bridge.handle_webhook(&failure(&link.correlation_id)).await.unwrap();
        assert_eq!(outcome, WebhookDisposition::Applied(Stage::PaymentPending));

        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_not_fatal() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let outcome = f.bridge.handle_webhook(&success("cs_test_missing")).await.unwrap();
        assert_eq!(outcome, WebhookDisposition::NotFound);
    }

    #[tokio::test]
    async fn test_webhook_applies_after_expiry() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let link = checkout(&f).await;
        f.clock.advance(chrono::Duration::hours(25));

        let outcome = f.bridge.handle_webhook(&success(&link.correlation_id)).await.unwrap();
        assert_eq!(outcome, WebhookDisposition::Applied(Stage::ReadyToCommit));
    }

    #[tokio::test]
    async fn test_webhook_racing_a_session_write_lands_once() {
        let f = fixture("pro", Stage::PaymentPending).await;
        let link = checkout(&f).await;

        let racing = Arc::new(RacingStore::new(f.store.clone()));
        let bridge = PaymentBridge::new(
            racing.clone(),
            f.gateway.clone(),
            PlanCatalog::standard(),
            f.clock.clone(),
            OnboardingConfig::default(),
        );
        let before = f.store.get_by_token(&f.token).await.unwrap().unwrap();

        racing.arm();
        let outcome = bridge.handle_webhook(&success(&link.correlation_id)).await.unwrap();
        assert_eq!(outcome, WebhookDisposition::Applied(Stage::ReadyToCommit));
        // First CAS lost to the competing write, the re-read one won
        assert_eq!(racing.update_calls(), 2);

        let stored = f.store.get_by_token(&f.token).await.unwrap().unwrap();
        assert_eq!(stored.version, before.version + 2);
        assert_eq!(stored.payment_status, PaymentStatus::Succeeded);
        assert_eq!(stored.checkout.subscription_ref.as_deref(), Some("sub_1"));

        let replay = bridge.handle_webhook(&success(&link.correlation_id)).await.unwrap();
        assert_eq!(replay, WebhookDisposition::Duplicate);
        assert_eq!(racing.update_calls(), 2);
        assert_eq!(f.store.get_by_token(&f.token).await.unwrap().unwrap(), stored);
    }

    #[test]
    fn test_notice_wire_shape() {
        let notice: PaymentNotice = serde_json::from_str(
            r#"{"correlation_id":"cs_1","outcome":"failed","reason":"card_declined"}"#,
        )
        .unwrap();
        assert_eq!(
            notice.outcome,
            PaymentOutcome::Failed {
                reason: Some("card_declined".into())
            }
        );
    }
}
