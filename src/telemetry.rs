//! Tracing subscriber setup.
//!
//! Invocations run as short-lived tasks under an external dispatcher, so
//! there is no file logging or rotation here; stdout plus an `EnvFilter`
//! covers both operator runs and the task runner's log capture.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. Safe to call once per process; later
/// calls are ignored (tests share one process).
pub fn init(logging: &LoggingConfig) {
    if !logging.stdout {
        return;
    }

    let filter = match &logging.filter {
        Some(directives) => EnvFilter::new(directives.clone()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let registry = Registry::default().with(filter);
    let result = match logging.stdout_format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    if result.is_err() {
        tracing::debug!("telemetry already initialised");
    }
}
