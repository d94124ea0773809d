//! Application State

use std::sync::Arc;

use onboarding_core::OnboardingService;

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Every onboarding operation goes through here
    pub service: OnboardingService,

    pub config: Arc<ServerConfig>,
}
