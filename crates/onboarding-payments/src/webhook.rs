//! Stripe Webhook Handling
//!
//! Reduces verified Stripe events to onboarding payment notices. The checkout
//! session id is the correlation id.

use onboarding_core::{PaymentNotice, PaymentOutcome};
use stripe::{CheckoutSession, CheckoutSessionPaymentStatus, Event, EventObject, EventType};

/// What a checkout session event means for onboarding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verdict {
    Succeeded,
    Failed(&'static str),
    /// Completed with a delayed payment method; the money has not moved yet
    Processing,
    Irrelevant,
}

fn verdict(event_type: EventType, payment_status: CheckoutSessionPaymentStatus) -> Verdict {
    match event_type {
        EventType::CheckoutSessionCompleted if payment_status == CheckoutSessionPaymentStatus::Unpaid => {
            Verdict::Processing
        }
        EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded => {
            Verdict::Succeeded
        }
        EventType::CheckoutSessionAsyncPaymentFailed => Verdict::Failed("async_payment_failed"),
        EventType::CheckoutSessionExpired => Verdict::Failed("checkout_expired"),
        _ => Verdict::Irrelevant,
    }
}

/// Map a Stripe event to a payment notice. Events that say nothing about a
/// checkout's outcome map to `None`.
pub fn notice_from_event(event: &Event) -> Option<PaymentNotice> {
    let EventObject::CheckoutSession(session) = &event.data.object else {
        tracing::debug!(event_type = ?event.type_, "Unhandled webhook event");
        return None;
    };

    let outcome = match verdict(event.type_, session.payment_status) {
        Verdict::Succeeded => succeeded(session),
        Verdict::Failed(reason) => PaymentOutcome::Failed {
            reason: Some(reason.into()),
        },
        Verdict::Processing => {
            tracing::info!(checkout_id = %session.id, "checkout completed, payment still processing");
            return None;
        }
        Verdict::Irrelevant => {
            tracing::debug!(event_type = ?event.type_, "Unhandled webhook event");
            return None;
        }
    };

    Some(PaymentNotice {
        correlation_id: session.id.to_string(),
        outcome,
    })
}

fn succeeded(session: &CheckoutSession) -> PaymentOutcome {
    PaymentOutcome::Succeeded {
        customer_ref: session.customer.as_ref().map(|c| c.id().to_string()),
        subscription_ref: session.subscription.as_ref().map(|s| s.id().to_string()),
    }
}
