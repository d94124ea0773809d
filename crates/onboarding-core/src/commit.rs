//! Commit Orchestrator
//!
//! Turns a `ready_to_commit` session into permanent user, workspace,
//! business and subscription records inside one [`CommitTx`]. Either every
//! record and the session's committed flag land together, or none do.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::account::{
    Business, BusinessId, CommitReceipt, Subscription, SubscriptionId, User, UserId, Workspace,
    WorkspaceId,
};
use crate::clock::Clock;
use crate::config::OnboardingConfig;
use crate::engine::{self, Event};
use crate::error::{bounded, OnboardingError, Result};
use crate::identity::{Notification, NotificationSink};
use crate::session::{OnboardingSession, Profile, SessionToken};
use crate::store::{load_mutable, CommitTx, Ledger, SessionStore};

/// Runs the final all-or-nothing write
#[derive(Clone)]
pub struct CommitOrchestrator {
    store: Arc<dyn SessionStore>,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: OnboardingConfig,
}

impl CommitOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: OnboardingConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            sink,
            clock,
            config,
        }
    }

    pub async fn commit(&self, token: &SessionToken) -> Result<CommitReceipt> {
        let now = self.clock.now();
        let session = load_mutable(self.store.as_ref(), token, now).await?;
        engine::advance(&session, Event::CommitRequested)?;

        // The session was read before the transaction opened; mark_committed
        // re-checks its version so a concurrent writer aborts the commit
        let mut tx = self.ledger.begin().await?;
        let receipt = match write_records(tx.as_mut(), &session, now).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(rollback(&session, e)),
        };
        tx.commit().await.map_err(|e| rollback(&session, e))?;

        tracing::info!(
            session_id = %session.id,
            user_id = %receipt.user_id,
            workspace_id = %receipt.workspace_id,
            business_id = %receipt.business_id,
            existing_user = receipt.existing_user,
            "onboarding committed"
        );

        self.send_welcome(&session).await;
        Ok(receipt)
    }

    async fn send_welcome(&self, session: &OnboardingSession) {
        let notification = Notification::Welcome {
            email: session.email.clone(),
            first_name: session
                .profile
                .as_ref()
                .map(|p| p.first_name.clone())
                .unwrap_or_default(),
        };
        if let Err(e) = bounded(self.config.capability_timeout, self.sink.send(&notification)).await {
            tracing::warn!(session_id = %session.id, error = %e, "welcome notification not delivered");
        }
    }
}

async fn write_records(
    tx: &mut dyn CommitTx,
    session: &OnboardingSession,
    now: DateTime<Utc>,
) -> Result<CommitReceipt> {
    let draft = session
        .business_draft
        .as_ref()
        .ok_or_else(|| OnboardingError::CommitFailed("business draft missing".into()))?;

    let (user_id, existing_user) = match tx.find_user_by_email(&session.email).await? {
        Some(user) => (user.id, true),
        None => {
            let profile = session.profile.clone().unwrap_or_else(|| Profile {
                first_name: String::new(),
                last_name: String::new(),
            });
            let id = tx
                .insert_user(User {
                    id: UserId::new(),
                    email: session.email.clone(),
                    first_name: profile.first_name,
                    last_name: profile.last_name,
                    password_hash: session.password_hash.clone(),
                    email_verified: session.email_verified,
                    created_at: now,
                })
                .await?;
            (id, false)
        }
    };

    let workspace_id = WorkspaceId::new();
    tx.insert_workspace(Workspace {
        id: workspace_id.clone(),
        owner_id: user_id.clone(),
        created_at: now,
    })
    .await?;

    let business_id = BusinessId::new();
    tx.insert_business(Business {
        id: business_id.clone(),
        workspace_id: workspace_id.clone(),
        name: draft.name.clone(),
        descriptor: draft.descriptor.clone(),
        country: draft.country.clone(),
        currency: draft.currency.clone(),
        created_at: now,
    })
    .await?;

    let subscription_id = SubscriptionId::new();
    tx.insert_subscription(Subscription {
        id: subscription_id.clone(),
        workspace_id: workspace_id.clone(),
        plan_id: session.selected_plan_id.clone(),
        gateway_subscription: session.checkout.subscription_ref.clone(),
        gateway_customer: session.checkout.customer_ref.clone(),
        created_at: now,
    })
    .await?;

    tx.mark_committed(session, now).await?;

    Ok(CommitReceipt {
        user_id,
        workspace_id,
        business_id,
        subscription_id,
        existing_user,
    })
}

/// Report a rolled-back commit. Races and terminal states keep their own
/// error so the client can react; everything else is one aggregate failure.
fn rollback(session: &OnboardingSession, err: OnboardingError) -> OnboardingError {
    match err {
        OnboardingError::ConcurrentModification
        | OnboardingError::SessionAlreadyCommitted
        | OnboardingError::SessionNotFound => err,
        OnboardingError::CommitFailed(reason) => {
            tracing::error!(session_id = %session.id, %reason, "commit rolled back");
            OnboardingError::CommitFailed(reason)
        }
        other => {
            tracing::error!(session_id = %session.id, error = %other, "commit rolled back");
            OnboardingError::CommitFailed(other.to_string())
        }
    }
}
