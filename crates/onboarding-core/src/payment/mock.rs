//! Mock payment gateway
//!
//! Hands out `cs_test_*` checkouts and accepts webhook bodies signed with a
//! hex HMAC-SHA256 of the raw payload.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use super::{Checkout, CheckoutRequest, PaymentGateway, PaymentNotice};
use crate::error::CapabilityError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Default)]
struct MockState {
    requests: Vec<CheckoutRequest>,
    by_idempotency_key: HashMap<String, Checkout>,
    failing: bool,
    delay: Option<Duration>,
}

/// In-process stand-in for a hosted checkout provider
pub struct MockPaymentGateway {
    secret: String,
    state: RwLock<MockState>,
}

impl MockPaymentGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            state: RwLock::new(MockState::default()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.write().failing = failing;
    }

    /// Sleep before answering checkout creation
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Every checkout request received, including idempotent repeats
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .requests
            .clone()
    }

    /// Signature header value for `payload`
    pub fn sign(&self, payload: &str) -> String {
        self.mac()
            .map(|mut mac| {
                mac.update(payload.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            })
            .unwrap_or_default()
    }

    /// Signed-ready webhook body for a successful payment
    pub fn success_payload(correlation_id: &str) -> String {
        serde_json::json!({
            "correlation_id": correlation_id,
            "outcome": "succeeded",
            "customer_ref": "cus_mock",
            "subscription_ref": "sub_mock",
        })
        .to_string()
    }

    /// Signed-ready webhook body for a failed payment
    pub fn failure_payload(correlation_id: &str) -> String {
        serde_json::json!({
            "correlation_id": correlation_id,
            "outcome": "failed",
            "reason": "card_declined",
        })
        .to_string()
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes()).ok()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MockState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> Result<Checkout, CapabilityError> {
        let (failing, delay) = {
            let state = self.write();
            (state.failing, state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(CapabilityError::Unavailable("mock gateway offline".into()));
        }

        let mut state = self.write();
        state.requests.push(request.clone());
        let checkout = state
            .by_idempotency_key
            .entry(request.idempotency_key)
            .or_insert_with(|| {
                let id = format!("cs_test_{}", Uuid::new_v4().simple());
                Checkout {
                    redirect_url: format!("https://checkout.test/pay/{id}"),
                    correlation_id: id,
                }
            })
            .clone();
        Ok(checkout)
    }

    fn parse_webhook(&self, payload: &str, signature: &str) -> Result<Option<PaymentNotice>, CapabilityError> {
        let expected = hex::decode(signature.trim())
            .map_err(|_| CapabilityError::Rejected("malformed signature".into()))?;
        let mut mac = self
            .mac()
            .ok_or_else(|| CapabilityError::Unavailable("webhook secret unusable".into()))?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| CapabilityError::Rejected("signature mismatch".into()))?;

        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| CapabilityError::Rejected(format!("invalid payload: {e}")))?;
        match value.get("outcome").and_then(serde_json::Value::as_str) {
            Some("succeeded" | "failed") => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CapabilityError::Rejected(format!("invalid payload: {e}"))),
            _ => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
