//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so stdout stays clean for JSON command output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "BLACKBOARD_LOG";
const DEFAULT_FILTER: &str = "blackboard=info";

/// Install the global subscriber. `BLACKBOARD_LOG` wins over `RUST_LOG`; `verbose` raises the
/// default to debug. Safe to call more than once (later calls are ignored).
pub fn init_tracing(verbose: bool) {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| {
            if verbose {
                "blackboard=debug".to_string()
            } else {
                DEFAULT_FILTER.to_string()
            }
        });
    let filter = tracing_subscriber::EnvFilter::try_new(directives)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
