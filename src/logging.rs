//! Tracing subscriber setup.

use crate::error::{GraphError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable that, when set, replaces the filter passed to
/// [`init_logging`].
pub const LOG_ENV: &str = "DOCGRAPH_LOG";

/// Installs a global compact `tracing` subscriber. `level` is any
/// `EnvFilter` directive list, e.g. `"docgraph=debug"` or
/// `"docgraph::txn=trace,warn"`.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(build_filter(level)?)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .try_init()
        .map_err(|_| GraphError::InvalidArgument("logging already initialized".into()))
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    let directives = std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| level.to_owned());
    EnvFilter::try_new(&directives).map_err(|e| {
        GraphError::InvalidArgument(format!("invalid log filter {directives:?}: {e}"))
    })
}
