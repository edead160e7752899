//! Diagnostic logging setup

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable holding a filter directive, e.g. `fastav=debug`
pub const LOG_ENV: &str = "FASTAV_LOG";

/// Default filter for a given `-v` count
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "fastav=warn",
        1 => "fastav=info",
        _ => "fastav=debug",
    }
}

/// Install the stderr subscriber.
///
/// `FASTAV_LOG` wins over the verbosity flag when set and valid. Safe to call
/// more than once; only the first call has any effect.
pub fn init_tracing(verbosity: u8) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity >= 2)
                    .with_thread_names(verbosity >= 2),
            )
            .with(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(0), "fastav=warn");
        assert_eq!(default_directive(1), "fastav=info");
        assert_eq!(default_directive(5), "fastav=debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(0);
        init_tracing(2);
    }
}
