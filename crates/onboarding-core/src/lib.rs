//! # onboarding-core
//!
//! Resumable onboarding session state machine with identity, payment and
//! commit sub-flows.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       OnboardingService                           │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐  │
//! │  │ Resolution │  │  Identity  │  │  Payment   │  │   Commit   │  │
//! │  │   Policy   │  │  Sub-flow  │  │   Bridge   │  │Orchestrator│  │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  │
//! │        └───────────────┴───────┬───────┴───────────────┘         │
//! │                        Transition Engine                          │
//! │                     SessionStore / Ledger                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! External capabilities (`IdentityProvider`, `NotificationSink`,
//! `PaymentGateway`) are traits so Google, Resend or Stripe can be swapped
//! for the in-process mocks without touching the flow.

pub mod account;
pub mod clock;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod payment;
pub mod plan;
pub mod resolution;
pub mod service;
pub mod session;
pub mod store;

pub use account::{CommitReceipt, User, UserId, WorkspaceId, BusinessId, SubscriptionId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OnboardingConfig;
pub use engine::{Event, Step};
pub use error::{CapabilityError, OnboardingError, Result};
pub use identity::{IdentityProof, IdentityProvider, Notification, NotificationSink, VerifiedIdentity};
pub use payment::{
    Checkout, CheckoutLink, CheckoutRequest, PaymentGateway, PaymentNotice, PaymentOutcome,
    WebhookDisposition,
};
pub use plan::{BillingInterval, Plan, PlanCatalog};
pub use resolution::StartOutcome;
pub use service::{Capabilities, OnboardingService};
pub use session::{
    BusinessDraft, ConflictSummary, OnboardingSession, PaymentStatus, SessionSummary, SessionToken,
    Stage,
};
pub use store::{Ledger, MemoryBackend, SessionStore};
