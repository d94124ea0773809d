//! Shared helpers for HTTP integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use onboarding_core::identity::{MemoryNotificationSink, StaticIdentityProvider};
use onboarding_core::payment::MockPaymentGateway;
use onboarding_core::{
    Capabilities, ManualClock, MemoryBackend, OnboardingConfig, OnboardingService, PlanCatalog,
    VerifiedIdentity,
};
use onboarding_server::config::ServerConfig;
use onboarding_server::handlers::SIGNATURE_HEADER;
use onboarding_server::{router, AppState};
use tower::ServiceExt;

pub const EMAIL: &str = "jane@example.com";
pub const GOOGLE_ASSERTION: &str = "google-auth-code";

/// Router plus handles on the in-memory collaborators behind it
pub struct TestApp {
    pub router: Router,
    pub backend: MemoryBackend,
    pub sink: Arc<MemoryNotificationSink>,
    pub gateway: Arc<MockPaymentGateway>,
    pub clock: Arc<ManualClock>,
}

pub fn build_test_app() -> TestApp {
    let backend = MemoryBackend::new();
    let sink = Arc::new(MemoryNotificationSink::new());
    let gateway = Arc::new(MockPaymentGateway::new("whsec_test"));
    let clock = Arc::new(ManualClock::default());
    let identity = StaticIdentityProvider::new().with_identity(
        GOOGLE_ASSERTION,
        VerifiedIdentity {
            email: EMAIL.into(),
            email_verified: true,
            given_name: Some("Jane".into()),
            family_name: Some("Doe".into()),
        },
    );

    let service = OnboardingService::with_clock(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        Capabilities {
            identity: Arc::new(identity),
            notifications: sink.clone(),
            payments: gateway.clone(),
        },
        PlanCatalog::standard(),
        OnboardingConfig::default(),
        clock.clone(),
    );
    let state = AppState {
        service,
        config: Arc::new(ServerConfig::default()),
    };

    TestApp {
        router: router(state),
        backend,
        sink,
        gateway,
        clock,
    }
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Method::GET, uri, Body::empty(), None).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(Method::DELETE, uri, Body::empty(), None).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(Method::POST, uri, Body::from(body.to_string()), None).await
    }

    /// Post a webhook body signed by the mock gateway
    pub async fn post_webhook(&self, payload: &str) -> Response<Body> {
        let signature = self.gateway.sign(payload);
        self.post_webhook_with_signature(payload, &signature).await
    }

    pub async fn post_webhook_with_signature(&self, payload: &str, signature: &str) -> Response<Body> {
        self.send(
            Method::POST,
            "/webhook/payment",
            Body::from(payload.to_string()),
            Some(signature),
        )
        .await
    }

    async fn send(&self, method: Method, uri: &str, body: Body, signature: Option<&str>) -> Response<Body> {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        self.router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Start a fresh session and return its token
    pub async fn start(&self, plan: &str) -> String {
        let response = self
            .post_json(
                "/api/onboarding/start",
                serde_json::json!({ "email": EMAIL, "plan_id": plan }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "started");
        json["token"].as_str().unwrap().to_string()
    }

    /// Issue a code and verify it with a full profile
    pub async fn verify_by_code(&self, token: &str) -> serde_json::Value {
        let response = self
            .post_json("/api/onboarding/email/code", serde_json::json!({ "token": token }))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let code = self.sink.last_code_for(EMAIL).unwrap();

        let response = self
            .post_json(
                "/api/onboarding/verify-identity",
                serde_json::json!({
                    "token": token,
                    "method": "code",
                    "code": code,
                    "first_name": "Jane",
                    "last_name": "Doe",
                    "password": "correct-horse-battery"
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    pub async fn submit_business(&self, token: &str) -> Response<Body> {
        self.post_json(
            "/api/onboarding/submit-business",
            serde_json::json!({
                "token": token,
                "name": "Jane's Bakery",
                "descriptor": "janes-bakery",
                "country": "us",
                "currency": "usd"
            }),
        )
        .await
    }
}

/// Collect a response body as JSON
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
