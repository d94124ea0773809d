//! Mock identity capabilities
//!
//! For testing and local development.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{IdentityProvider, Notification, NotificationSink, VerifiedIdentity};
use crate::error::CapabilityError;

/// Records every notification instead of delivering it
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    sent: RwLock<Vec<Notification>>,
    failing: RwLock<bool>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail with `Unavailable`
    pub fn set_failing(&self, failing: bool) {
        *self.failing.write().unwrap_or_else(std::sync::PoisonError::into_inner) = failing;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Most recent verification code sent to `email`
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent().into_iter().rev().find_map(|n| match n {
            Notification::VerificationCode { email: to, code, .. } if to == email => Some(code),
            _ => None,
        })
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<(), CapabilityError> {
        if *self.failing.read().unwrap_or_else(std::sync::PoisonError::into_inner) {
            return Err(CapabilityError::Unavailable("sink offline".into()));
        }
        self.sent
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}

/// Identity provider answering from a fixed assertion table
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    identities: HashMap<String, VerifiedIdentity>,
    delay: Option<Duration>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identity(mut self, assertion: impl Into<String>, identity: VerifiedIdentity) -> Self {
        self.identities.insert(assertion.into(), identity);
        self
    }

    /// Sleep before answering (for timeout tests)
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, assertion: &str) -> Result<VerifiedIdentity, CapabilityError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.identities
            .get(assertion)
            .cloned()
            .ok_or_else(|| CapabilityError::Rejected("unknown assertion".into()))
    }

    fn name(&self) -> &str {
        "static"
    }
}
