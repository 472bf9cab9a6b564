//! Logging setup shared by the forgeq binaries.
//!
//! Two output shapes, selected by `FORGEQ_LOG_FORMAT`: `json` (the default;
//! one object per line, for production log pipelines) and `console` (for
//! development). Filtering honors `RUST_LOG` when set; otherwise the level
//! comes from `FORGEQ_LOG_LEVEL` (default `info`), with sqlx statement
//! logging demoted to `warn` so per-claim queries do not drown the worker's
//! own output.

use tracing_subscriber::EnvFilter;

/// Initialize logging for a forgeq binary.
///
/// `service` tags the first log line so multi-process deployments can tell
/// worker and reaper streams apart. Safe to call multiple times; subsequent
/// calls become no-ops.
pub fn init(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("FORGEQ_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    });

    let format = std::env::var("FORGEQ_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if format == "console" {
        builder.try_init().is_ok()
    } else {
        builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(service, log_format = %format, "logging initialized");
    }
}
