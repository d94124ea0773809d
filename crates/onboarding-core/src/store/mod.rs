//! Session Store
//!
//! Persistence seams for onboarding. The store is the single source of
//! truth: handlers never cache sessions between requests, and every write is
//! a compare-and-swap on [`OnboardingSession::version`].

mod memory;
#[cfg(test)]
mod racing;

pub use memory::{FailPoint, MemoryBackend, RecordCounts};
#[cfg(test)]
pub(crate) use racing::RacingStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::account::{Business, Subscription, User, UserId, Workspace};
use crate::error::{OnboardingError, Result};
use crate::session::{OnboardingSession, SessionToken};

/// Session persistence, keyed by token with secondary lookups by checkout
/// correlation id and active email
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with `ConcurrentModification` when the
    /// token is taken or another active session holds the same email.
    async fn create(&self, session: &OnboardingSession, now: DateTime<Utc>) -> Result<()>;

    /// Fetch by token, regardless of expiry or commit state
    async fn get_by_token(&self, token: &SessionToken) -> Result<Option<OnboardingSession>>;

    /// Fetch by checkout correlation id
    async fn get_by_correlation_id(&self, correlation_id: &str)
        -> Result<Option<OnboardingSession>>;

    /// Fetch the non-committed, non-expired session for an email
    async fn find_active_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OnboardingSession>>;

    /// Write `session` if the stored version still equals `session.version`.
    /// Returns the stored record with its bumped version.
    async fn update(&self, session: &OnboardingSession) -> Result<OnboardingSession>;

    /// Delete if the stored version still equals `expected_version`.
    /// Committed sessions are never deleted through this path.
    async fn delete(&self, token: &SessionToken, expected_version: u64) -> Result<()>;

    /// Remove every session whose `expires_at` is before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// One all-or-nothing unit of permanent writes. Dropping without
/// [`CommitTx::commit`] discards everything staged so far.
#[async_trait]
pub trait CommitTx: Send {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>>;

    async fn insert_user(&mut self, user: User) -> Result<UserId>;

    async fn insert_workspace(&mut self, workspace: Workspace) -> Result<()>;

    async fn insert_business(&mut self, business: Business) -> Result<()>;

    async fn insert_subscription(&mut self, subscription: Subscription) -> Result<()>;

    /// Flip the session to committed, guarded by its version
    async fn mark_committed(&mut self, session: &OnboardingSession, at: DateTime<Utc>) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Opens transactions spanning permanent records and the session row
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CommitTx>>;
}

/// Load a session that is allowed to change: present, not committed, not
/// expired. Committed wins over expired so callers get the specific error.
pub async fn load_mutable(
    store: &dyn SessionStore,
    token: &SessionToken,
    now: DateTime<Utc>,
) -> Result<OnboardingSession> {
    let session = store
        .get_by_token(token)
        .await?
        .ok_or(OnboardingError::SessionNotFound)?;

    if session.committed {
        return Err(OnboardingError::SessionAlreadyCommitted);
    }
    if session.is_expired(now) {
        return Err(OnboardingError::SessionNotFound);
    }
    Ok(session)
}
