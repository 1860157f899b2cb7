//! Tracing subscriber setup.
//!
//! Logs go to stderr so that command output on stdout stays machine-readable.
//! `RUST_LOG` takes precedence over the built-in default filter.

use tracing_subscriber::{EnvFilter, fmt};

/// Default filter directive for the given debug flag.
pub fn default_directive(debug: bool) -> &'static str {
    if debug { "ragstore=debug" } else { "ragstore=info" }
}

/// Installs the global subscriber. Returns false if one was already set.
pub fn init(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "ragstore=info");
        assert_eq!(default_directive(true), "ragstore=debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        assert!(!init(true));
    }
}
