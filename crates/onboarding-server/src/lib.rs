//! Onboarding HTTP Server
//!
//! Axum routes over [`OnboardingService`](onboarding_core::OnboardingService).
//! The binary in `main.rs` wires real capabilities; tests build the same
//! router over the in-memory backend and mocks.

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    extract::Request,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    commit, delete_session, get_session, health_check, initiate_payment, issue_code,
    payment_webhook, start, submit_business, verify_identity,
};
pub use crate::state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))

        // Onboarding API
        .route("/api/onboarding/start", post(start))
        .route("/api/onboarding/email/code", post(issue_code))
        .route("/api/onboarding/verify-identity", post(verify_identity))
        .route("/api/onboarding/submit-business", post(submit_business))
        .route("/api/onboarding/initiate-payment", post(initiate_payment))
        .route("/api/onboarding/commit", post(commit))
        .route("/api/onboarding/session", get(get_session).delete(delete_session))

        // Payments
        .route("/webhook/payment", post(payment_webhook))

        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Span for one request. Records the path only: the query string carries
/// the session token.
fn request_span(request: &Request) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path()
    )
}
