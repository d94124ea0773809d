//! Onboarding Service
//!
//! One facade over the sub-flows, holding shared handles to the store, the
//! ledger and the external capabilities. Request handlers call only this.

use std::sync::Arc;
use std::time::Duration;

use crate::account::CommitReceipt;
use crate::clock::{Clock, SystemClock};
use crate::commit::CommitOrchestrator;
use crate::config::OnboardingConfig;
use crate::engine::{self, Event};
use crate::error::{CapabilityError, OnboardingError, Result};
use crate::identity::{IdentityFlow, IdentityProof, IdentityProvider, NotificationSink};
use crate::payment::{CheckoutLink, PaymentBridge, PaymentGateway, WebhookDisposition};
use crate::plan::PlanCatalog;
use crate::resolution::{SessionResolver, StartOutcome};
use crate::session::{BusinessDraft, SessionSummary, SessionToken, Stage};
use crate::store::{load_mutable, Ledger, SessionStore};

/// External collaborators the service calls out to
#[derive(Clone)]
pub struct Capabilities {
    pub identity: Arc<dyn IdentityProvider>,
    pub notifications: Arc<dyn NotificationSink>,
    pub payments: Arc<dyn PaymentGateway>,
}

/// Entry point for every onboarding operation
#[derive(Clone)]
pub struct OnboardingService {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    catalog: PlanCatalog,
    resolver: SessionResolver,
    identity: IdentityFlow,
    payments: PaymentBridge,
    committer: CommitOrchestrator,
}

impl OnboardingService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        ledger: Arc<dyn Ledger>,
        capabilities: Capabilities,
        catalog: PlanCatalog,
        config: OnboardingConfig,
    ) -> Self {
        Self::with_clock(store, ledger, capabilities, catalog, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SessionStore>,
        ledger: Arc<dyn Ledger>,
        capabilities: Capabilities,
        catalog: PlanCatalog,
        config: OnboardingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let Capabilities {
            identity,
            notifications,
            payments,
        } = capabilities;

        Self {
            resolver: SessionResolver::new(store.clone(), catalog.clone(), clock.clone(), config.clone()),
            identity: IdentityFlow::new(
                store.clone(),
                identity,
                notifications.clone(),
                clock.clone(),
                config.clone(),
            ),
            payments: PaymentBridge::new(store.clone(), payments, catalog.clone(), clock.clone(), config.clone()),
            committer: CommitOrchestrator::new(store.clone(), ledger, notifications, clock.clone(), config),
            store,
            clock,
            catalog,
        }
    }

    pub const fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn payments_configured(&self) -> bool {
        self.payments.gateway().is_configured()
    }

    /// Create, resume, or report a conflicting session for `email`
    pub async fn start(
        &self,
        email: &str,
        plan_id: &str,
        token: Option<&SessionToken>,
    ) -> Result<StartOutcome> {
        self.resolver.start(email, plan_id, token).await
    }

    /// Send a verification code; returns the resend cooldown
    pub async fn issue_code(&self, token: &SessionToken) -> Result<Duration> {
        self.identity.issue_code(token).await
    }

    pub async fn verify_identity(&self, token: &SessionToken, proof: IdentityProof) -> Result<Stage> {
        self.identity.verify(token, proof).await
    }

    /// Stage the business draft. The returned stage is already resolved to
    /// `payment_pending` or `ready_to_commit`.
    pub async fn submit_business(&self, token: &SessionToken, draft: BusinessDraft) -> Result<Stage> {
        let draft = draft.normalized()?;
        let now = self.clock.now();
        let mut session = load_mutable(self.store.as_ref(), token, now).await?;

        engine::apply(&mut session, Event::BusinessSubmitted)?;
        session.business_draft = Some(draft);
        session.updated_at = now;
        let session = self.store.update(&session).await?;

        tracing::info!(session_id = %session.id, stage = %session.stage, "business staged");
        Ok(session.stage)
    }

    pub async fn initiate_payment(
        &self,
        token: &SessionToken,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutLink> {
        self.payments.initiate_checkout(token, success_url, cancel_url).await
    }

    /// Authenticate and apply a raw provider webhook
    pub async fn handle_payment_webhook(&self, payload: &str, signature: &str) -> Result<WebhookDisposition> {
        let notice = match self.payments.gateway().parse_webhook(payload, signature) {
            Ok(Some(notice)) => notice,
            Ok(None) => return Ok(WebhookDisposition::Ignored),
            Err(CapabilityError::Rejected(reason)) => {
                tracing::warn!(%reason, "payment webhook rejected");
                return Err(OnboardingError::validation("signature", reason));
            }
            Err(e) => return Err(e.into()),
        };
        self.payments.handle_webhook(&notice).await
    }

    pub async fn commit(&self, token: &SessionToken) -> Result<CommitReceipt> {
        self.committer.commit(token).await
    }

    /// Resumable view of an active session. Expired, committed and unknown
    /// tokens all read as not found.
    pub async fn get_session(&self, token: &SessionToken) -> Result<SessionSummary> {
        let now = self.clock.now();
        self.store
            .get_by_token(token)
            .await?
            .filter(|s| s.is_active(now))
            .map(|s| s.summary())
            .ok_or(OnboardingError::SessionNotFound)
    }

    /// Explicit "start fresh": remove a session that has not been committed
    pub async fn delete_session(&self, token: &SessionToken) -> Result<()> {
        let now = self.clock.now();
        let session = load_mutable(self.store.as_ref(), token, now).await?;
        self.store.delete(token, session.version).await?;
        tracing::info!(session_id = %session.id, stage = %session.stage, "session deleted");
        Ok(())
    }

    /// Drop sessions past their expiry, committed or not
    pub async fn purge_expired(&self) -> Result<usize> {
        let purged = self.store.purge_expired(self.clock.now()).await?;
        if purged > 0 {
            tracing::info!(purged, "expired onboarding sessions purged");
        }
        Ok(purged)
    }
}
