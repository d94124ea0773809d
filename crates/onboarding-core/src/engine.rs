//! Stage Transition Engine
//!
//! Pure transition function over ([`Stage`], [`Event`]). Every pair either
//! advances, is a no-op, or is a typed rejection:
//!
//! ```text
//! plan_selected ──email──▶ identity_pending ──identity──▶ identity_verified
//!                                                              │ business
//!                                                     (staged, resolved here)
//!                                       paid ┌─────────────────┴──────┐ free
//!                                            ▼                        ▼
//!                                     payment_pending ──paid──▶ ready_to_commit ──commit──▶ committed
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{OnboardingError, Result};
use crate::session::{OnboardingSession, Stage};

/// Something that happened to a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Identity collection started for the session email
    EmailSubmitted,
    /// Code confirmed or OAuth succeeded
    IdentityConfirmed,
    /// Business draft accepted
    BusinessSubmitted,
    /// A checkout was created or reused
    CheckoutStarted,
    /// Payment provider confirmed payment
    PaymentSucceeded,
    /// Payment provider reported a failed or abandoned payment
    PaymentFailed,
    /// Client asked to finalize
    CommitRequested,
}

impl Event {
    pub const ALL: [Self; 7] = [
        Self::EmailSubmitted,
        Self::IdentityConfirmed,
        Self::BusinessSubmitted,
        Self::CheckoutStarted,
        Self::PaymentSucceeded,
        Self::PaymentFailed,
        Self::CommitRequested,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailSubmitted => "email_submitted",
            Self::IdentityConfirmed => "identity_confirmed",
            Self::BusinessSubmitted => "business_submitted",
            Self::CheckoutStarted => "checkout_started",
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
            Self::CommitRequested => "commit_requested",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an accepted event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Advanced { from: Stage, to: Stage },
    Unchanged(Stage),
}

impl Step {
    /// Stage after the step
    pub const fn stage(self) -> Stage {
        match self {
            Self::Advanced { to, .. } => to,
            Self::Unchanged(stage) => stage,
        }
    }

    pub const fn advanced(self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

/// Branch point reached when a business draft lands. Lives only for the
/// duration of one `next` call.
enum Staged {
    Business { paid: bool },
}

impl Staged {
    const fn resolve(self) -> Stage {
        match self {
            Self::Business { paid: true } => Stage::PaymentPending,
            Self::Business { paid: false } => Stage::ReadyToCommit,
        }
    }
}

enum Next {
    To(Stage),
    Same,
}

fn next(stage: Stage, is_paid_plan: bool, event: Event) -> Result<Next> {
    use Event as E;
    use Stage as S;

    let next = match (stage, event) {
        (S::Committed, _) => return Err(OnboardingError::SessionAlreadyCommitted),

        (S::PlanSelected, E::EmailSubmitted) => Next::To(S::IdentityPending),
        (S::IdentityPending, E::EmailSubmitted) => Next::Same,
        (S::IdentityPending, E::IdentityConfirmed) => Next::To(S::IdentityVerified),

        (S::IdentityVerified, E::BusinessSubmitted) => {
            Next::To(Staged::Business { paid: is_paid_plan }.resolve())
        }

        (S::PaymentPending, E::CheckoutStarted | E::PaymentFailed) => Next::Same,
        (S::PaymentPending, E::PaymentSucceeded) => Next::To(S::ReadyToCommit),

        // Replayed or out-of-order webhooks after payment already landed
        (S::ReadyToCommit, E::PaymentSucceeded | E::PaymentFailed) => Next::Same,
        (S::ReadyToCommit, E::CommitRequested) => Next::To(S::Committed),

        (stage, event) => return Err(OnboardingError::InvalidTransition { stage, event }),
    };
    Ok(next)
}

/// Compute the step `event` would produce for `session` without mutating it
pub fn advance(session: &OnboardingSession, event: Event) -> Result<Step> {
    let from = session.stage;
    match next(from, session.is_paid_plan, event)? {
        Next::To(to) if to != from => Ok(Step::Advanced { from, to }),
        Next::To(_) | Next::Same => Ok(Step::Unchanged(from)),
    }
}

/// Apply `event` to `session`, leaving it untouched on rejection
pub fn apply(session: &mut OnboardingSession, event: Event) -> Result<Step> {
    let step = advance(session, event)?;
    if let Step::Advanced { from, to } = step {
        tracing::debug!(session_id = %session.id, %from, %to, %event, "stage advanced");
        session.stage = to;
    }
    Ok(step)
}
