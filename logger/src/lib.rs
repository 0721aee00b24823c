//! Global `tracing` logger setup for binaries and tests that embed the node
//! core.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Installs the global stdout logger for tests when `RUST_LOG` is set.
/// Concurrent tests may race to install it; losers are ignored.
pub fn init_for_testing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = try_init();
    }
}

/// Installs a compact stdout logger filtered by `RUST_LOG` (INFO if unset),
/// e.g. `RUST_LOG=node_core::pay=debug,info`. Fails if a global subscriber
/// already exists.
pub fn try_init() -> Result<(), TryInitError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = targets_filter(rust_log.as_deref(), Level::INFO);

    let stdout = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout).try_init()
}

/// Parse a `RUST_LOG`-style [`Targets`] filter, falling back to
/// `default_level` for everything if unset or unparseable.
fn targets_filter(rust_log: Option<&str>, default_level: Level) -> Targets {
    rust_log
        .and_then(|rust_log| Targets::from_str(rust_log).ok())
        .unwrap_or_else(|| Targets::new().with_default(default_level))
}
