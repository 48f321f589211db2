//! Diagnostic logging setup.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable holding per-module log directives.
pub const LOG_ENV: &str = "DRIFTWATCH_LOG";

/// Install the global subscriber. Output goes to **stderr** only; stdout is
/// reserved for protocol events.
///
/// Filter precedence: `DRIFTWATCH_LOG`, then `RUST_LOG`, then
/// `driftwatch=info` (`driftwatch=debug` when `verbose`). Safe to call more
/// than once.
pub fn init_logging(verbose: bool) {
    INIT.call_once(|| {
        let fallback = if verbose {
            "driftwatch=debug"
        } else {
            "driftwatch=info"
        };
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(fallback));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(false),
            )
            .with(filter)
            .init();
    });
}
