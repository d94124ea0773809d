//! Onboarding HTTP Server
//!
//! Wires the onboarding service to Stripe, Google and Resend when they are
//! configured, and to inert stand-ins when they are not.

use std::sync::Arc;

use onboarding_core::{
    Capabilities, IdentityProvider, MemoryBackend, NotificationSink, OnboardingConfig,
    OnboardingService, PaymentGateway, PlanCatalog,
};
use onboarding_payments::{StripeGateway, UnconfiguredGateway};
use onboarding_runtime::{
    GoogleIdentityProvider, ResendNotifier, TracingNotificationSink, UnconfiguredIdentityProvider,
};
use onboarding_server::{config::ServerConfig, router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let server_config = ServerConfig::from_env();
    let onboarding_config = OnboardingConfig::from_env();
    let catalog = plan_catalog();

    let payments: Arc<dyn PaymentGateway> = match StripeGateway::from_env() {
        Ok(stripe) => {
            tracing::info!("✓ Stripe configured");
            Arc::new(stripe)
        }
        Err(e) => {
            tracing::warn!("⚠ Stripe not configured - paid plans cannot check out ({e})");
            tracing::warn!("  Set STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET in .env");
            Arc::new(UnconfiguredGateway)
        }
    };

    let identity: Arc<dyn IdentityProvider> = match GoogleIdentityProvider::from_env() {
        Ok(google) => {
            tracing::info!("✓ Google sign-in configured");
            Arc::new(google)
        }
        Err(e) => {
            tracing::warn!("⚠ Google sign-in not configured - code verification only ({e})");
            Arc::new(UnconfiguredIdentityProvider)
        }
    };

    let notifications: Arc<dyn NotificationSink> = match ResendNotifier::from_env() {
        Ok(resend) => {
            tracing::info!("✓ Resend e-mail configured");
            Arc::new(resend)
        }
        Err(e) => {
            tracing::warn!("⚠ E-mail not configured - notifications are only logged ({e})");
            Arc::new(TracingNotificationSink)
        }
    };

    let backend = MemoryBackend::new();
    let service = OnboardingService::new(
        Arc::new(backend.clone()),
        Arc::new(backend),
        Capabilities {
            identity,
            notifications,
            payments,
        },
        catalog,
        onboarding_config,
    );

    if let Some(every) = server_config.purge_interval {
        let service = service.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = service.purge_expired().await {
                    tracing::error!(error = %e, "session purge failed");
                }
            }
        });
    }

    let state = AppState {
        service,
        config: Arc::new(server_config.clone()),
    };
    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&server_config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 onboarding server running on http://{}", server_config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                            - Health check");
    tracing::info!("  POST   /api/onboarding/start              - Start or resume");
    tracing::info!("  POST   /api/onboarding/email/code         - Send verification code");
    tracing::info!("  POST   /api/onboarding/verify-identity    - Code or OAuth proof");
    tracing::info!("  POST   /api/onboarding/submit-business    - Stage business draft");
    tracing::info!("  POST   /api/onboarding/initiate-payment   - Create checkout");
    tracing::info!("  POST   /api/onboarding/commit             - Create account");
    tracing::info!("  GET    /api/onboarding/session?token=     - Resume state");
    tracing::info!("  DELETE /api/onboarding/session?token=     - Start fresh");
    tracing::info!("  POST   /webhook/payment                   - Stripe webhook");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Standard catalog, with Stripe price ids from `STRIPE_PRICE_<PLAN>` where set
fn plan_catalog() -> PlanCatalog {
    let standard = PlanCatalog::standard();
    let ids: Vec<String> = standard.ids().map(str::to_string).collect();

    ids.into_iter().fold(standard, |catalog, id| {
        match std::env::var(format!("STRIPE_PRICE_{}", id.to_uppercase())) {
            Ok(price) => catalog.with_gateway_price(&id, price),
            Err(_) => catalog,
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
