//! Onboarding configuration

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Longest duration accepted from the environment (ten years)
const MAX_ENV_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Tunables for the onboarding flow
#[derive(Clone, Debug)]
pub struct OnboardingConfig {
    /// Lifetime of a session from creation
    pub session_ttl: Duration,

    /// Lifetime of an issued verification code
    pub code_ttl: Duration,

    /// Digits in a verification code
    pub code_length: usize,

    /// Minimum gap between two code dispatches for one session
    pub code_resend_cooldown: Duration,

    /// Wrong codes allowed before lockout
    pub max_code_attempts: u32,

    /// Lockout after too many wrong codes
    pub code_lockout: Duration,

    /// Upper bound for any identity, notification or payment call
    pub capability_timeout: Duration,

    /// New checkouts allowed per window
    pub checkout_max_attempts: u32,

    /// Throttle window for new checkouts
    pub checkout_window: Duration,

    /// Minimum gap between two new checkouts
    pub checkout_min_interval: Duration,

    /// Re-read/re-apply attempts for webhook writes that lose a CAS race
    pub webhook_retry_limit: u32,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(24 * 60 * 60),
            code_ttl: Duration::from_secs(15 * 60),
            code_length: 6,
            code_resend_cooldown: Duration::from_secs(2 * 60),
            max_code_attempts: 5,
            code_lockout: Duration::from_secs(15 * 60),
            capability_timeout: Duration::from_secs(10),
            checkout_max_attempts: 3,
            checkout_window: Duration::from_secs(10 * 60),
            checkout_min_interval: Duration::from_secs(30),
            webhook_retry_limit: 3,
        }
    }
}

impl OnboardingConfig {
    /// Load overrides from environment variables, keeping defaults for the rest
    ///
    /// | Env Var | Default |
    /// |---|---|
    /// | `ONBOARDING_SESSION_TTL_SECS` | `86400` |
    /// | `ONBOARDING_CODE_TTL_SECS` | `900` |
    /// | `ONBOARDING_MAX_CODE_ATTEMPTS` | `5` |
    /// | `ONBOARDING_CAPABILITY_TIMEOUT_SECS` | `10` |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            session_ttl: env_secs("ONBOARDING_SESSION_TTL_SECS").unwrap_or(defaults.session_ttl),
            code_ttl: env_secs("ONBOARDING_CODE_TTL_SECS").unwrap_or(defaults.code_ttl),
            max_code_attempts: std::env::var("ONBOARDING_MAX_CODE_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_code_attempts),
            capability_timeout: env_secs("ONBOARDING_CAPABILITY_TIMEOUT_SECS")
                .unwrap_or(defaults.capability_timeout),
            ..defaults
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    let parsed = parse_secs(&raw);
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, max_secs = MAX_ENV_SECS, "ignoring invalid duration");
    }
    parsed
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs <= MAX_ENV_SECS)
        .map(Duration::from_secs)
}

/// `at + d`, saturating at the latest representable instant
pub(crate) fn after(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|span| at.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secs_bounds() {
        assert_eq!(parse_secs(" 3600 "), Some(Duration::from_secs(3600)));
        assert_eq!(parse_secs("-1"), None);
        assert_eq!(parse_secs("soon"), None);
        assert_eq!(parse_secs(&u64::MAX.to_string()), None);
        assert_eq!(parse_secs(&MAX_ENV_SECS.to_string()), Some(Duration::from_secs(MAX_ENV_SECS)));
    }

    #[test]
    fn test_after_saturates() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::from_secs(60)), now + chrono::Duration::seconds(60));
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(after(now, Duration::from_secs(u64::MAX / 2)), DateTime::<Utc>::MAX_UTC);
    }
}
