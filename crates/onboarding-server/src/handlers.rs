//! HTTP Handlers

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use onboarding_core::{
    BusinessDraft, CheckoutLink, CommitReceipt, IdentityProof, SessionSummary, SessionToken,
    Stage, StartOutcome, WebhookDisposition,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the provider's webhook signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub payments_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub email: String,
    pub plan_id: String,
    /// Token from a previous visit on this device, if any
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyIdentityRequest {
    pub token: String,
    #[serde(flatten)]
    pub proof: IdentityProof,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBusinessRequest {
    pub token: String,
    #[serde(flatten)]
    pub business: BusinessDraft,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub token: String,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StageResponse {
    pub stage: Stage,
}

#[derive(Debug, Serialize)]
pub struct CodeIssuedResponse {
    pub sent: bool,
    pub retry_after_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub disposition: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        payments_configured: state.service.payments_configured(),
    })
}

/// Start, resume, or report a conflicting session
pub async fn start(
    State(state): State<AppState>,
    Json(payload): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = payload.token.map(SessionToken::from_string);
    let outcome = state
        .service
        .start(&payload.email, &payload.plan_id, token.as_ref())
        .await?;

    let status = match outcome {
        StartOutcome::Started(_) => StatusCode::CREATED,
        StartOutcome::Resumed(_) | StartOutcome::Conflict(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// Send (or re-send) the e-mail verification code
pub async fn issue_code(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<CodeIssuedResponse>, ApiError> {
    let token = SessionToken::from_string(payload.token);
    let cooldown = state.service.issue_code(&token).await?;
    Ok(Json(CodeIssuedResponse {
        sent: true,
        retry_after_secs: cooldown.as_secs(),
    }))
}

pub async fn verify_identity(
    State(state): State<AppState>,
    Json(payload): Json<VerifyIdentityRequest>,
) -> Result<Json<StageResponse>, ApiError> {
    let token = SessionToken::from_string(payload.token);
    let stage = state.service.verify_identity(&token, payload.proof).await?;
    Ok(Json(StageResponse { stage }))
}

pub async fn submit_business(
    State(state): State<AppState>,
    Json(payload): Json<SubmitBusinessRequest>,
) -> Result<Json<StageResponse>, ApiError> {
    let token = SessionToken::from_string(payload.token);
    let stage = state.service.submit_business(&token, payload.business).await?;
    Ok(Json(StageResponse { stage }))
}

/// Create or reuse a hosted checkout
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<CheckoutLink>, ApiError> {
    let token = SessionToken::from_string(payload.token);
    let success_url = payload
        .success_url
        .unwrap_or_else(|| state.config.checkout_success_url.clone());
    let cancel_url = payload
        .cancel_url
        .unwrap_or_else(|| state.config.checkout_cancel_url.clone());

    let link = state
        .service
        .initiate_payment(&token, &success_url, &cancel_url)
        .await?;
    Ok(Json(link))
}

pub async fn commit(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<CommitReceipt>, ApiError> {
    let token = SessionToken::from_string(payload.token);
    Ok(Json(state.service.commit(&token).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<SessionSummary>, ApiError> {
    let token = SessionToken::from_string(query.token);
    Ok(Json(state.service.get_session(&token).await?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<StatusCode, ApiError> {
    let token = SessionToken::from_string(query.token);
    state.service.delete_session(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Payment provider webhook. Anything other than a bad signature or a
/// storage failure is acknowledged so the provider stops retrying.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".into()))?;

    let disposition = state
        .service
        .handle_payment_webhook(&body, signature)
        .await?;

    Ok(Json(WebhookResponse {
        received: true,
        disposition: match disposition {
            WebhookDisposition::Applied(_) => "applied",
            WebhookDisposition::Duplicate => "duplicate",
            WebhookDisposition::Ignored => "ignored",
            WebhookDisposition::NotFound => "not_found",
        },
    }))
}
