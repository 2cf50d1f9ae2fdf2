use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

fn build_env_filter_from(rust_log: Option<&str>, debug: bool) -> EnvFilter {
    if let Some(v) = rust_log {
        if let Ok(filter) = EnvFilter::try_new(v) {
            return filter;
        }
    }
    EnvFilter::new(if debug { "debug" } else { "info" })
}

/// Initializes the process-wide JSON tracing subscriber. Idempotent: safe to call
/// from both `main` and tests.
pub fn init_logging(debug: bool) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = build_env_filter_from(std::env::var("RUST_LOG").ok().as_deref(), debug);

        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_target(true);

        let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
        let _ = subscriber.try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_prefers_rust_log_over_debug_flag() {
        let f = build_env_filter_from(Some("warn"), true);
        assert_eq!(f.to_string(), "warn");

        let f = build_env_filter_from(None, true);
        assert_eq!(f.to_string(), "debug");

        let f = build_env_filter_from(None, false);
        assert_eq!(f.to_string(), "info");
    }
}
