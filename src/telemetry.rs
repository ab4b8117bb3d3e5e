//! Logging setup

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter: pipeline events at `info`, dependencies at `warn`.
pub const DEFAULT_FILTER: &str = "warn,infraclimate=info";

/// Install a `fmt` subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Returns `false` if a global subscriber was already installed, so it is
/// safe to call from every test or binary entry point.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt().with_env_filter(filter).with_target(false).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        init_tracing(DEFAULT_FILTER);
        assert!(!init_tracing(DEFAULT_FILTER));
    }
}
