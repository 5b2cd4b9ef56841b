//! ABOUTME: Tracing subscriber setup for every binary and test
//! ABOUTME: JSON logs in production, pretty logs elsewhere

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing - safe to call multiple times
///
/// `production` switches to JSON lines so collector logs can be shipped as-is;
/// anything else gets the pretty human format.
pub fn init_tracing(env: &str, service: &str) {
    INIT.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = if env == "production" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
        };

        if result.is_ok() {
            tracing::info!(service = %service, env = %env, "Tracing initialized");
        }
    });
}
