//! Onboarding Session
//!
//! The staged record a client builds up across devices. Nothing here is
//! permanent until the commit step converts it into account records.

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::after;
use crate::error::{OnboardingError, Result};
use crate::plan::Plan;

const TOKEN_LENGTH: usize = 40;

/// Opaque client-held credential. The only session identifier that may
/// leave the server.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh unguessable token
    pub fn generate() -> Self {
        let token = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// Internal session identifier, safe to log and to share with providers
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("obs_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-observable onboarding stage.
///
/// The business-staged branch point is resolved inside the engine and has no
/// variant here, so it can never be stored or serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PlanSelected,
    IdentityPending,
    IdentityVerified,
    PaymentPending,
    ReadyToCommit,
    Committed,
}

impl Stage {
    pub const ALL: [Self; 6] = [
        Self::PlanSelected,
        Self::IdentityPending,
        Self::IdentityVerified,
        Self::PaymentPending,
        Self::ReadyToCommit,
        Self::Committed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlanSelected => "plan_selected",
            Self::IdentityPending => "identity_pending",
            Self::IdentityVerified => "identity_verified",
            Self::PaymentPending => "payment_pending",
            Self::ReadyToCommit => "ready_to_commit",
            Self::Committed => "committed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment sub-flow state, tracked apart from [`Stage`] because webhooks
/// update it out-of-band
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    None,
    Pending,
    Succeeded,
    Failed,
}

/// How identity was proven
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMethod {
    Code,
    OAuth,
}

/// Staged business details, validated but not yet a real business
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessDraft {
    pub name: String,
    pub descriptor: String,
    pub country: String,
    pub currency: String,
}

impl BusinessDraft {
    /// Validate and normalize a submitted draft
    pub fn normalized(self) -> Result<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(OnboardingError::validation("name", "is required"));
        }
        if name.chars().count() > 100 {
            return Err(OnboardingError::validation("name", "is too long"));
        }
        if name.chars().any(char::is_control) {
            return Err(OnboardingError::validation("name", "contains invalid characters"));
        }

        let descriptor = self.descriptor.trim().to_lowercase();
        let descriptor_ok = (3..=40).contains(&descriptor.len())
            && descriptor
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !descriptor.starts_with('-')
            && !descriptor.ends_with('-');
        if !descriptor_ok {
            return Err(OnboardingError::validation(
                "descriptor",
                "must be 3-40 lowercase letters, digits or hyphens",
            ));
        }

        let country = self.country.trim().to_ascii_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(OnboardingError::validation("country", "must be a 2-letter code"));
        }

        let currency = self.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(OnboardingError::validation("currency", "must be a 3-letter code"));
        }

        Ok(Self {
            name,
            descriptor,
            country,
            currency,
        })
    }
}

/// Person behind the signup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
}

/// Outstanding verification code for the code-based identity path
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeState {
    /// Argon2id hash of the issued code
    pub hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Wrong submissions against the current code
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Checkout bookkeeping for the payment bridge
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutState {
    pub redirect_url: Option<String>,
    /// New checkouts created in the current throttle window
    pub attempts: u32,
    pub window_started_at: Option<DateTime<Utc>>,
    pub last_created_at: Option<DateTime<Utc>>,
    /// Total checkouts ever created, feeds the idempotency key
    pub sequence: u32,
    pub customer_ref: Option<String>,
    pub subscription_ref: Option<String>,
}

/// A complete onboarding session record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingSession {
    pub id: SessionId,
    pub token: SessionToken,

    /// Optimistic concurrency version, bumped by the store on every write
    pub version: u64,

    pub stage: Stage,

    /// Normalized email captured at start
    pub email: String,
    pub email_verified: bool,

    pub selected_plan_id: String,
    pub is_paid_plan: bool,

    pub identity_method: Option<IdentityMethod>,
    pub profile: Option<Profile>,
    /// Argon2id hash, moved to the user record at commit
    pub password_hash: Option<String>,
    pub code: CodeState,

    pub business_draft: Option<BusinessDraft>,

    pub payment_status: PaymentStatus,
    pub checkout_correlation_id: Option<String>,
    pub checkout: CheckoutState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    pub committed: bool,
    pub committed_at: Option<DateTime<Utc>>,
}

impl OnboardingSession {
    /// Create a new session for a normalized email and a catalog plan
    pub fn new(email: String, plan: &Plan, now: DateTime<Utc>, ttl: std::time::Duration) -> Self {
        Self {
            id: SessionId::new(),
            token: SessionToken::generate(),
            version: 0,
            stage: Stage::PlanSelected,
            email,
            email_verified: false,
            selected_plan_id: plan.id.clone(),
            is_paid_plan: plan.is_paid(),
            identity_method: None,
            profile: None,
            password_hash: None,
            code: CodeState::default(),
            business_draft: None,
            payment_status: PaymentStatus::None,
            checkout_correlation_id: None,
            checkout: CheckoutState::default(),
            created_at: now,
            updated_at: now,
            expires_at: after(now, ttl),
            committed: false,
            committed_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Neither committed nor expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.committed && !self.is_expired(now)
    }

    /// Full resumable view for the token holder
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            token: self.token.as_str().to_string(),
            stage: self.stage,
            email: self.email.clone(),
            plan_id: self.selected_plan_id.clone(),
            is_paid_plan: self.is_paid_plan,
            payment_status: self.payment_status,
            identity_verified: self.email_verified,
            profile: self.profile.clone(),
            business: self.business_draft.clone(),
            expires_at: self.expires_at,
        }
    }

    /// Redacted view for a device that presented only the email
    pub fn conflict_summary(&self) -> ConflictSummary {
        ConflictSummary {
            stage: self.stage,
            email: self.email.clone(),
            masked_email: mask_email(&self.email),
            plan_id: self.selected_plan_id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Resumable session state returned to the token holder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub token: String,
    pub stage: Stage,
    pub email: String,
    pub plan_id: String,
    pub is_paid_plan: bool,
    pub payment_status: PaymentStatus,
    pub identity_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business: Option<BusinessDraft>,
    pub expires_at: DateTime<Utc>,
}

/// What another device learns about an existing session: never the token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub stage: Stage,
    /// Normalized form of the address the caller presented
    pub email: String,
    pub masked_email: String,
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Trim, lowercase and sanity-check an email address
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
        }
        None => false,
    };
    if !valid || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(OnboardingError::validation("email", "is not a valid address"));
    }
    Ok(email)
}

/// `jane@example.com` → `j***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None => "***".into(),
    }
}

/// Trim and check a human name
pub fn normalize_name(field: &str, raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(OnboardingError::validation(field, "is required"));
    }
    if name.chars().count() > 100 {
        return Err(OnboardingError::validation(field, "is too long"));
    }
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(char::is_alphabetic);
    let rest_ok = chars.all(|c| c.is_alphabetic() || matches!(c, ' ' | '\'' | '-'));
    if !starts_with_letter || !rest_ok {
        return Err(OnboardingError::validation(field, "contains invalid characters"));
    }
    Ok(name.to_string())
}
