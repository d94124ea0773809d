//! Plan Catalog
//!
//! Plans a client may select when starting onboarding. A plan with a
//! non-zero price routes the session through the payment branch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{OnboardingError, Result};

/// Billing interval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

/// A subscription plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub currency: String,
    pub interval: BillingInterval,
    /// Provider-side price reference (e.g. a Stripe price id), when one exists
    #[serde(default)]
    pub gateway_price: Option<String>,
}

impl Plan {
    pub const fn is_paid(&self) -> bool {
        self.price_cents > 0
    }
}

/// Lookup table of selectable plans
#[derive(Clone, Debug, Default)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
}

impl PlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Free, Starter and Pro tiers
    pub fn standard() -> Self {
        Self::new([
            Plan {
                id: "free".into(),
                name: "Free".into(),
                description: "One business, core features".into(),
                price_cents: 0,
                currency: "usd".into(),
                interval: BillingInterval::Monthly,
                gateway_price: None,
            },
            Plan {
                id: "starter".into(),
                name: "Starter".into(),
                description: "Up to three businesses and team seats".into(),
                price_cents: 1900, // $19/month
                currency: "usd".into(),
                interval: BillingInterval::Monthly,
                gateway_price: None,
            },
            Plan {
                id: "pro".into(),
                name: "Pro".into(),
                description: "Unlimited businesses, priority support".into(),
                price_cents: 4900, // $49/month
                currency: "usd".into(),
                interval: BillingInterval::Monthly,
                gateway_price: None,
            },
        ])
    }

    /// Attach a provider price reference to a plan
    #[must_use]
    pub fn with_gateway_price(mut self, plan_id: &str, price: impl Into<String>) -> Self {
        if let Some(plan) = self.plans.get_mut(plan_id) {
            plan.gateway_price = Some(price.into());
        }
        self
    }

    pub fn get(&self, plan_id: &str) -> Result<&Plan> {
        self.plans
            .get(plan_id)
            .ok_or_else(|| OnboardingError::PlanNotFound(plan_id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog() {
        let catalog = PlanCatalog::standard();
        assert!(!catalog.get("free").unwrap().is_paid());
        assert_eq!(catalog.get("pro").unwrap().price_cents, 4900);
        assert!(matches!(catalog.get("gold"), Err(OnboardingError::PlanNotFound(_))));
    }

    #[test]
    fn test_gateway_price_attached() {
        let catalog = PlanCatalog::standard().with_gateway_price("pro", "price_123");
        assert_eq!(catalog.get("pro").unwrap().gateway_price.as_deref(), Some("price_123"));
    }
}
