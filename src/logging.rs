//! Diagnostic tracing to stderr.
//!
//! `RUST_LOG` wins when set; otherwise `arbor=info`, or `arbor=debug` with
//! `--verbose`. Progress lines for the operator are printed by the CLI, not
//! through tracing.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "arbor=debug" } else { "arbor=info" }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .try_init();
}
