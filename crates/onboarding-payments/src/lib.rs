//! # onboarding-payments
//!
//! Stripe implementation of the onboarding [`PaymentGateway`].
//!
//! Uses Stripe Checkout (hosted): the client is redirected to Stripe's page
//! and comes back to the success or cancel URL. The outcome arrives later as
//! a signed webhook, which this crate verifies and reduces to a
//! [`PaymentNotice`](onboarding_core::PaymentNotice).
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  Onboarding │────▶│  Stripe Hosted  │────▶│  Onboarding │
//! │  (payment)  │     │  Checkout Page  │     │  (success)  │
//! └─────────────┘     └────────┬────────┘     └─────────────┘
//!                              │ webhook
//!                              ▼
//!                     POST /webhook/payment
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use onboarding_payments::StripeGateway;
//!
//! let gateway = StripeGateway::from_env()?;
//! let capabilities = Capabilities {
//!     payments: Arc::new(gateway),
//!     ..
//! };
//! ```

mod checkout;
mod error;
mod webhook;

pub use checkout::{StripeGateway, UnconfiguredGateway};
pub use error::{PaymentError, Result};
pub use webhook::notice_from_event;

pub use onboarding_core::PaymentGateway;
