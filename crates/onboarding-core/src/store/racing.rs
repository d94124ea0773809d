//! Store wrapper that slips one competing write between a caller's read and
//! its compare-and-swap

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MemoryBackend, SessionStore};
use crate::error::Result;
use crate::session::{OnboardingSession, SessionToken};

pub(crate) struct RacingStore {
    inner: MemoryBackend,
    armed: AtomicBool,
    updates: AtomicUsize,
}

impl RacingStore {
    pub(crate) const fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            updates: AtomicUsize::new(0),
        }
    }

    /// The next session read returns a copy that is already stale
    pub(crate) fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// `update` calls made through this wrapper, excluding the competing write
    pub(crate) fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    async fn race(&self, read: Option<OnboardingSession>) -> Result<Option<OnboardingSession>> {
        if let Some(stale) = &read {
            if self.armed.swap(false, Ordering::SeqCst) {
                let mut competing = stale.clone();
                competing.updated_at += chrono::Duration::seconds(1);
                self.inner.update(&competing).await?;
            }
        }
        Ok(read)
    }
}

#[async_trait]
impl SessionStore for RacingStore {
    async fn create(&self, session: &OnboardingSession, now: DateTime<Utc>) -> Result<()> {
        self.inner.create(session, now).await
    }

    async fn get_by_token(&self, token: &SessionToken) -> Result<Option<OnboardingSession>> {
        let read = self.inner.get_by_token(token).await?;
        self.race(read).await
    }

    async fn get_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<OnboardingSession>> {
        let read = self.inner.get_by_correlation_id(correlation_id).await?;
        self.race(read).await
    }

    async fn find_active_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OnboardingSession>> {
        self.inner.find_active_by_email(email, now).await
    }

    async fn update(&self, session: &OnboardingSession) -> Result<OnboardingSession> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(session).await
    }

    async fn delete(&self, token: &SessionToken, expected_version: u64) -> Result<()> {
        self.inner.delete(token, expected_version).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_expired(now).await
    }
}
