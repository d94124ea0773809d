//! Server configuration

use std::time::Duration;

/// HTTP server settings, read from the environment
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// How often expired sessions are purged; `None` disables the task
    pub purge_interval: Option<Duration>,

    /// Default Stripe redirect after payment
    pub checkout_success_url: String,

    /// Default Stripe redirect when the user backs out
    pub checkout_cancel_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            purge_interval: Some(Duration::from_secs(3600)),
            checkout_success_url: "http://localhost:3000/onboarding/payment/success".into(),
            checkout_cancel_url: "http://localhost:3000/onboarding/payment/cancel".into(),
        }
    }
}

impl ServerConfig {
    /// | Env Var | Default |
    /// |---|---|
    /// | `BIND_ADDR` | `0.0.0.0:3000` |
    /// | `ONBOARDING_PURGE_INTERVAL_SECS` | `3600` (`0` disables) |
    /// | `ONBOARDING_CHECKOUT_SUCCESS_URL` | `http://localhost:3000/onboarding/payment/success` |
    /// | `ONBOARDING_CHECKOUT_CANCEL_URL` | `http://localhost:3000/onboarding/payment/cancel` |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let purge_interval = match std::env::var("ONBOARDING_PURGE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.purge_interval,
        };

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            purge_interval,
            checkout_success_url: std::env::var("ONBOARDING_CHECKOUT_SUCCESS_URL")
                .unwrap_or(defaults.checkout_success_url),
            checkout_cancel_url: std::env::var("ONBOARDING_CHECKOUT_CANCEL_URL")
                .unwrap_or(defaults.checkout_cancel_url),
        }
    }
}
