//! # onboarding-runtime
//!
//! Runtime capabilities for the onboarding flow.
//!
//! ## Identity providers
//!
//! - **Google** (default): OAuth authorization-code exchange + OpenID userinfo
//!
//! ## Notification sinks
//!
//! - **Resend** (default): transactional e-mail over the Resend HTTP API
//! - **Tracing**: logs each notification, for local development
//!
//! ## Usage
//!
//! ```rust,ignore
//! use onboarding_runtime::{GoogleIdentityProvider, ResendNotifier};
//!
//! let identity = GoogleIdentityProvider::from_env()?;
//! let notifications = ResendNotifier::from_env()?;
//! ```

mod error;
mod sink;

#[cfg(feature = "google")]
pub mod google;

#[cfg(feature = "resend")]
pub mod resend;

pub use error::{Result, RuntimeError};
pub use sink::{render, Rendered, TracingNotificationSink, UnconfiguredIdentityProvider};

#[cfg(feature = "google")]
pub use google::{GoogleConfig, GoogleIdentityProvider};

#[cfg(feature = "resend")]
pub use resend::{ResendConfig, ResendNotifier};

// Re-export core types for convenience
pub use onboarding_core::{CapabilityError, IdentityProvider, Notification, NotificationSink, VerifiedIdentity};
