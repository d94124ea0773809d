//! Stripe Checkout Integration
//!
//! Hosted checkout sessions in subscription mode, one per onboarding
//! checkout attempt.

use async_trait::async_trait;
use onboarding_core::plan::{BillingInterval, Plan};
use onboarding_core::{CapabilityError, Checkout, CheckoutRequest, PaymentGateway, PaymentNotice};
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval, Currency, RequestStrategy, Webhook,
};

use crate::error::{PaymentError, Result};
use crate::webhook::notice_from_event;

/// Stripe client wrapper
pub struct StripeGateway {
    client: Client,
    webhook_secret: String,
}

impl StripeGateway {
    /// Create a new Stripe gateway
    pub fn new(secret_key: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(secret_key),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| PaymentError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;

        Ok(Self::new(&secret_key, &webhook_secret))
    }

    /// Create a Stripe Checkout session (Hosted approach)
    ///
    /// The request's idempotency key goes out as Stripe's `Idempotency-Key`,
    /// so a retried attempt gets the session Stripe already created.
    pub async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<Checkout> {
        if !request.plan.is_paid() {
            return Err(PaymentError::Config(format!(
                "plan {} has no price to charge",
                request.plan.id
            )));
        }

        let mut params = CreateCheckoutSession::new();
        params.customer_email = Some(&request.email);
        params.client_reference_id = Some(&request.session_id);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.metadata = Some(request.metadata.clone());
        params.line_items = Some(vec![line_item(&request.plan)?]);

        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(request.idempotency_key.clone()));
        let session = StripeCheckoutSession::create(&client, params)
            .await
            .map_err(|e| PaymentError::Stripe(e.to_string()))?;

        let redirect_url = session
            .url
            .ok_or_else(|| PaymentError::Stripe("No checkout URL returned".into()))?;

        tracing::debug!(checkout_id = %session.id, plan_id = %request.plan.id, "stripe checkout session created");
        Ok(Checkout {
            correlation_id: session.id.to_string(),
            redirect_url,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> std::result::Result<Checkout, CapabilityError> {
        Ok(self.create_checkout_session(&request).await?)
    }

    fn parse_webhook(
        &self,
        payload: &str,
        signature: &str,
    ) -> std::result::Result<Option<PaymentNotice>, CapabilityError> {
        let event = Webhook::construct_event(payload, signature, &self.webhook_secret)
            .map_err(PaymentError::from)?;
        tracing::info!(event_type = ?event.type_, "Processing Stripe webhook");
        Ok(notice_from_event(&event))
    }

    fn name(&self) -> &str {
        "stripe"
    }
}

/// Line item for `plan`: the configured Stripe price when there is one,
/// inline price data otherwise
fn line_item(plan: &Plan) -> Result<CreateCheckoutSessionLineItems> {
    if let Some(price) = &plan.gateway_price {
        return Ok(CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price: Some(price.clone()),
            ..Default::default()
        });
    }

    Ok(CreateCheckoutSessionLineItems {
        quantity: Some(1),
        price_data: Some(CreateCheckoutSessionLineItemsPriceData {
            currency: currency(&plan.currency)?,
            unit_amount: Some(plan.price_cents),
            product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                name: plan.name.clone(),
                description: Some(plan.description.clone()),
                ..Default::default()
            }),
            recurring: Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                interval: match plan.interval {
                    BillingInterval::Monthly => CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                    BillingInterval::Yearly => CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Year,
                },
                interval_count: Some(1),
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn currency(code: &str) -> Result<Currency> {
    match code.to_ascii_lowercase().as_str() {
        "usd" => Ok(Currency::USD),
        "eur" => Ok(Currency::EUR),
        "gbp" => Ok(Currency::GBP),
        "cad" => Ok(Currency::CAD),
        "aud" => Ok(Currency::AUD),
        "egp" => Ok(Currency::EGP),
        other => Err(PaymentError::Config(format!("unsupported plan currency {other}"))),
    }
}

/// Stand-in used when Stripe keys are absent: every checkout reports the
/// capability as unavailable and every webhook is refused
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_checkout(&self, _request: CheckoutRequest) -> std::result::Result<Checkout, CapabilityError> {
        Err(CapabilityError::Unavailable("payments are not configured".into()))
    }

    fn parse_webhook(
        &self,
        _payload: &str,
        _signature: &str,
    ) -> std::result::Result<Option<PaymentNotice>, CapabilityError> {
        Err(CapabilityError::Unavailable("payments are not configured".into()))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }

    fn is_configured(&self) -> bool {
        false
    }
}
