//! Console logging setup for applications embedding the client.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Install a global `tracing` subscriber printing to stderr.
///
/// `RUST_LOG` takes precedence over `default_directive` (e.g. `"info"` or
/// `"stratum_core=debug,info"`). Returns `false` when a global subscriber was
/// already installed, which makes repeated calls harmless.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(filter);

    Registry::default().with(console_layer).try_init().is_ok()
}
