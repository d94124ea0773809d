//! In-memory backend (for development/testing)
//!
//! Sessions and permanent records share one lock, so a [`CommitTx`] holds
//! the whole backend for its lifetime and stages writes until `commit`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{CommitTx, Ledger, SessionStore};
use crate::account::{Business, BusinessId, Subscription, SubscriptionId, User, UserId, Workspace, WorkspaceId};
use crate::error::{OnboardingError, Result};
use crate::session::{OnboardingSession, SessionToken, Stage};

/// Step at which an injected failure fires inside a commit transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    User,
    Workspace,
    Business,
    Subscription,
    MarkCommitted,
    Commit,
}

/// Number of permanent records, for assertions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub users: usize,
    pub workspaces: usize,
    pub businesses: usize,
    pub subscriptions: usize,
}

#[derive(Default)]
struct State {
    sessions: HashMap<SessionToken, OnboardingSession>,
    by_correlation: HashMap<String, SessionToken>,
    users: HashMap<UserId, User>,
    users_by_email: HashMap<String, UserId>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    businesses: HashMap<BusinessId, Business>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

impl State {
    fn remove_session(&mut self, token: &SessionToken) -> Option<OnboardingSession> {
        let removed = self.sessions.remove(token)?;
        if let Some(correlation) = &removed.checkout_correlation_id {
            self.by_correlation.remove(correlation);
        }
        Some(removed)
    }
}

/// Shared in-memory sessions plus account tables
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    fail_point: Arc<std::sync::Mutex<Option<FailPoint>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit transactions fail at `point`
    pub fn fail_at(&self, point: Option<FailPoint>) {
        *self
            .fail_point
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = point;
    }

    pub async fn record_counts(&self) -> RecordCounts {
        let state = self.state.lock().await;
        RecordCounts {
            users: state.users.len(),
            workspaces: state.workspaces.len(),
            businesses: state.businesses.len(),
            subscriptions: state.subscriptions.len(),
        }
    }

    pub async fn user_by_email(&self, email: &str) -> Option<User> {
        let state = self.state.lock().await;
        state
            .users_by_email
            .get(email)
            .and_then(|id| state.users.get(id))
            .cloned()
    }

    /// Seed a pre-existing user (invited or returning identity)
    pub async fn insert_user(&self, user: User) {
        let mut state = self.state.lock().await;
        state.users_by_email.insert(user.email.clone(), user.id.clone());
        state.users.insert(user.id.clone(), user);
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.subscriptions.values().cloned().collect()
    }

    fn current_fail_point(&self) -> Option<FailPoint> {
        *self
            .fail_point
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for MemoryBackend {
    async fn create(&self, session: &OnboardingSession, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.sessions.contains_key(&session.token) {
            return Err(OnboardingError::ConcurrentModification);
        }
        let email_taken = state
            .sessions
            .values()
            .any(|s| s.email == session.email && s.is_active(now));
        if email_taken {
            return Err(OnboardingError::ConcurrentModification);
        }

        if let Some(correlation) = &session.checkout_correlation_id {
            state.by_correlation.insert(correlation.clone(), session.token.clone());
        }
        state.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn get_by_token(&self, token: &SessionToken) -> Result<Option<OnboardingSession>> {
        Ok(self.state.lock().await.sessions.get(token).cloned())
    }

    async fn get_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<OnboardingSession>> {
        let state = self.state.lock().await;
        Ok(state
            .by_correlation
            .get(correlation_id)
            .and_then(|token| state.sessions.get(token))
            .cloned())
    }

    async fn find_active_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OnboardingSession>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.email == email && s.is_active(now))
            .cloned())
    }

    async fn update(&self, session: &OnboardingSession) -> Result<OnboardingSession> {
        let mut state = self.state.lock().await;

        let stored = state
            .sessions
            .get(&session.token)
            .ok_or(OnboardingError::SessionNotFound)?;
        if stored.committed {
            return Err(OnboardingError::SessionAlreadyCommitted);
        }
        if stored.version != session.version {
            return Err(OnboardingError::ConcurrentModification);
        }
        let previous_correlation = stored.checkout_correlation_id.clone();

        if previous_correlation != session.checkout_correlation_id {
            if let Some(correlation) = &session.checkout_correlation_id {
                if state
                    .by_correlation
                    .get(correlation)
                    .is_some_and(|owner| owner != &session.token)
                {
                    return Err(OnboardingError::Storage(
                        "checkout correlation id already in use".into(),
                    ));
                }
                state.by_correlation.insert(correlation.clone(), session.token.clone());
            }
            if let Some(old) = previous_correlation {
                state.by_correlation.remove(&old);
            }
        }

        let mut written = session.clone();
        written.version += 1;
        state.sessions.insert(written.token.clone(), written.clone());
        Ok(written)
    }

    async fn delete(&self, token: &SessionToken, expected_version: u64) -> Result<()> {
        let mut state = self.state.lock().await;

        let stored = state
            .sessions
            .get(token)
            .ok_or(OnboardingError::SessionNotFound)?;
        if stored.committed {
            return Err(OnboardingError::SessionAlreadyCommitted);
        }
        if stored.version != expected_version {
            return Err(OnboardingError::ConcurrentModification);
        }
        state.remove_session(token);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let expired: Vec<SessionToken> = state
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.token.clone())
            .collect();
        for token in &expired {
            state.remove_session(token);
        }
        Ok(expired.len())
    }
}

#[async_trait]
impl Ledger for MemoryBackend {
    async fn begin(&self) -> Result<Box<dyn CommitTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryTx {
            guard,
            fail_point: self.current_fail_point(),
            users: Vec::new(),
            workspaces: Vec::new(),
            businesses: Vec::new(),
            subscriptions: Vec::new(),
            committed_session: None,
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    fail_point: Option<FailPoint>,
    users: Vec<User>,
    workspaces: Vec<Workspace>,
    businesses: Vec<Business>,
    subscriptions: Vec<Subscription>,
    committed_session: Option<OnboardingSession>,
}

impl MemoryTx {
    fn check(&self, point: FailPoint) -> Result<()> {
        if self.fail_point == Some(point) {
            return Err(OnboardingError::Storage(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CommitTx for MemoryTx {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        let staged = self.users.iter().find(|u| u.email == email).cloned();
        Ok(staged.or_else(|| {
            self.guard
                .users_by_email
                .get(email)
                .and_then(|id| self.guard.users.get(id))
                .cloned()
        }))
    }

    async fn insert_user(&mut self, user: User) -> Result<UserId> {
        self.check(FailPoint::User)?;
        if self.guard.users_by_email.contains_key(&user.email) {
            return Err(OnboardingError::Storage("user email already exists".into()));
        }
        let id = user.id.clone();
        self.users.push(user);
        Ok(id)
    }

    async fn insert_workspace(&mut self, workspace: Workspace) -> Result<()> {
        self.check(FailPoint::Workspace)?;
        self.workspaces.push(workspace);
        Ok(())
    }

    async fn insert_business(&mut self, business: Business) -> Result<()> {
        self.check(FailPoint::Business)?;
        let descriptor_taken = self
            .guard
            .businesses
            .values()
            .any(|b| b.workspace_id == business.workspace_id && b.descriptor == business.descriptor);
        if descriptor_taken {
            return Err(OnboardingError::Storage("business descriptor already exists".into()));
        }
        self.businesses.push(business);
        Ok(())
    }

    async fn insert_subscription(&mut self, subscription: Subscription) -> Result<()> {
        self.check(FailPoint::Subscription)?;
        self.subscriptions.push(subscription);
        Ok(())
    }

    async fn mark_committed(&mut self, session: &OnboardingSession, at: DateTime<Utc>) -> Result<()> {
        self.check(FailPoint::MarkCommitted)?;
        let stored = self
            .guard
            .sessions
            .get(&session.token)
            .ok_or(OnboardingError::SessionNotFound)?;
        if stored.committed {
            return Err(OnboardingError::SessionAlreadyCommitted);
        }
        if stored.version != session.version {
            return Err(OnboardingError::ConcurrentModification);
        }

        let mut committed = stored.clone();
        committed.stage = Stage::Committed;
        committed.committed = true;
        committed.committed_at = Some(at);
        committed.updated_at = at;
        committed.version += 1;
        self.committed_session = Some(committed);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check(FailPoint::Commit)?;
        let Self {
            mut guard,
            users,
            workspaces,
            businesses,
            subscriptions,
            committed_session,
            ..
        } = *self;

        for user in users {
            guard.users_by_email.insert(user.email.clone(), user.id.clone());
            guard.users.insert(user.id.clone(), user);
        }
        for workspace in workspaces {
            guard.workspaces.insert(workspace.id.clone(), workspace);
        }
        for business in businesses {
            guard.businesses.insert(business.id.clone(), business);
        }
        for subscription in subscriptions {
            guard.subscriptions.insert(subscription.id.clone(), subscription);
        }
        if let Some(session) = committed_session {
            guard.sessions.insert(session.token.clone(), session);
        }
        Ok(())
    }
}
