//! Session Resolution Policy
//!
//! What `start` does when the email already has an active session. A device
//! holding that session's token resumes it; any other device only learns a
//! redacted summary and must explicitly delete before starting over.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::OnboardingConfig;
use crate::error::{OnboardingError, Result};
use crate::plan::PlanCatalog;
use crate::session::{normalize_email, ConflictSummary, OnboardingSession, SessionSummary, SessionToken};
use crate::store::SessionStore;

/// Decision for a start request
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    CreateFresh,
    Resume(&'a OnboardingSession),
    Conflict(&'a OnboardingSession),
}

/// Decide between fresh, resume and conflict. `existing` must already be
/// filtered to the active session for the email.
pub fn resolve<'a>(
    existing: Option<&'a OnboardingSession>,
    presented: Option<&SessionToken>,
) -> Resolution<'a> {
    match existing {
        None => Resolution::CreateFresh,
        Some(session) if presented == Some(&session.token) => Resolution::Resume(session),
        Some(session) => Resolution::Conflict(session),
    }
}

/// Result of `start`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started(SessionSummary),
    Resumed(SessionSummary),
    Conflict(ConflictSummary),
}

/// Applies the policy against the store
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn SessionStore>,
    catalog: PlanCatalog,
    clock: Arc<dyn Clock>,
    config: OnboardingConfig,
}

impl SessionResolver {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: PlanCatalog,
        clock: Arc<dyn Clock>,
        config: OnboardingConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            config,
        }
    }

    pub async fn start(
        &self,
        email: &str,
        plan_id: &str,
        presented: Option<&SessionToken>,
    ) -> Result<StartOutcome> {
        let email = normalize_email(email)?;
        let plan = self.catalog.get(plan_id)?;
        let now = self.clock.now();

        if let Some(token) = presented {
            let committed = self
                .store
                .get_by_token(token)
                .await?
                .is_some_and(|s| s.committed && s.email == email);
            if committed {
                return Err(OnboardingError::SessionAlreadyCommitted);
            }
        }

        // A create that loses the race to another device re-reads once and
        // reports that device's session as a conflict
        for _ in 0..2 {
            let existing = self.store.find_active_by_email(&email, now).await?;
            match resolve(existing.as_ref(), presented) {
                Resolution::Resume(session) => {
                    tracing::info!(session_id = %session.id, stage = %session.stage, "session resumed");
                    return Ok(StartOutcome::Resumed(session.summary()));
                }
                Resolution::Conflict(session) => {
                    tracing::info!(session_id = %session.id, stage = %session.stage, "start conflicts with active session");
                    return Ok(StartOutcome::Conflict(session.conflict_summary()));
                }
                Resolution::CreateFresh => {
                    let session = OnboardingSession::new(email.clone(), plan, now, self.config.session_ttl);
                    match self.store.create(&session, now).await {
                        Ok(()) => {
                            tracing::info!(session_id = %session.id, plan_id = %plan.id, paid = session.is_paid_plan, "session started");
                            return Ok(StartOutcome::Started(session.summary()));
                        }
                        Err(OnboardingError::ConcurrentModification) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Err(OnboardingError::ConcurrentModification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::Stage;
    use crate::store::MemoryBackend;

    fn resolver() -> (SessionResolver, MemoryBackend, Arc<ManualClock>) {
        let store = MemoryBackend::new();
        let clock = Arc::new(ManualClock::default());
        let resolver = SessionResolver::new(
            Arc::new(store.clone()),
            PlanCatalog::standard(),
            clock.clone(),
            OnboardingConfig::default(),
        );
        (resolver, store, clock)
    }

    fn started(outcome: StartOutcome) -> SessionSummary {
        match outcome {
            StartOutcome::Started(summary) => summary,
            other => panic!("expected a fresh session, got {other:?}"),
        }
    }

    #[test]
    fn test_policy_table() {
        let session = OnboardingSession::new(
            "a@example.com".into(),
            PlanCatalog::standard().get("free").unwrap(),
            chrono::Utc::now(),
            std::time::Duration::from_secs(60),
        );
        let stranger = SessionToken::generate();

        assert_eq!(resolve(None, None), Resolution::CreateFresh);
        assert_eq!(resolve(None, Some(&stranger)), Resolution::CreateFresh);
        assert_eq!(resolve(Some(&session), Some(&session.token)), Resolution::Resume(&session));
        assert_eq!(resolve(Some(&session), None), Resolution::Conflict(&session));
        assert_eq!(resolve(Some(&session), Some(&stranger)), Resolution::Conflict(&session));
    }

    #[tokio::test]
    async fn test_fresh_then_resume_then_conflict() {
        let (resolver, _, _) = resolver();
        let first = started(resolver.start(" Jane@Example.com ", "pro", None).await.unwrap());
        assert_eq!(first.stage, Stage::PlanSelected);
        assert!(first.is_paid_plan);
        assert_eq!(first.email, "jane@example.com");

        let token = SessionToken::from_string(first.token.clone());
        let resumed = resolver.start("jane@example.com", "pro", Some(&token)).await.unwrap();
        assert_eq!(resumed, StartOutcome::Resumed(first.clone()));

        match resolver.start("jane@example.com", "pro", None).await.unwrap() {
            StartOutcome::Conflict(conflict) => {
                assert_eq!(conflict.masked_email, "j***@example.com");
                assert_eq!(conflict.email, "jane@example.com");
                assert_eq!(conflict.stage, Stage::PlanSelected);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_session_does_not_conflict() {
        let (resolver, _, clock) = resolver();
        started(resolver.start("jane@example.com", "free", None).await.unwrap());
        clock.advance(chrono::Duration::hours(25));
        started(resolver.start("jane@example.com", "free", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_committed_token_is_reported() {
        let (resolver, store, _) = resolver();
        let summary = started(resolver.start("jane@example.com", "free", None).await.unwrap());
        let token = SessionToken::from_string(summary.token);

        let mut session = store.get_by_token(&token).await.unwrap().unwrap();
        session.committed = true;
        session.stage = Stage::Committed;
        store.update(&session).await.unwrap();

        assert_eq!(
            resolver.start("jane@example.com", "free", Some(&token)).await,
            Err(OnboardingError::SessionAlreadyCommitted)
        );
    }

    #[tokio::test]
    async fn test_unknown_plan_and_bad_email() {
        let (resolver, _, _) = resolver();
        assert!(matches!(
            resolver.start("jane@example.com", "platinum", None).await,
            Err(OnboardingError::PlanNotFound(_))
        ));
        assert!(matches!(
            resolver.start("not-an-email", "free", None).await,
            Err(OnboardingError::Validation { .. })
        ));
    }
}
