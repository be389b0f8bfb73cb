//! Tracing subscriber setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "USD_COMPOSE_LOG";

/// Filter from `USD_COMPOSE_LOG`, then `RUST_LOG`, then `warn`.
fn env_filter() -> EnvFilter {
    let directive = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install a formatting subscriber writing to stderr, filtered by
/// `USD_COMPOSE_LOG`, then `RUST_LOG`, then `warn`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter())
        .try_init()
        .is_ok()
}

/// Like [`init_tracing`], but output goes through the test harness so it
/// is captured per test.
pub fn init_test_tracing() -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(env_filter())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test_tracing();
        assert!(!init_tracing());
        assert!(!init_test_tracing());
    }
}
