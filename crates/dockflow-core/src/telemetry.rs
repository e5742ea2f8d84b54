//! Tracing set-up for the `dockflow` binary.
//!
//! Stage code only emits events (`info!(module = %name, ...)`); installing a
//! subscriber is the binary's job. [`init_tracing`] may be called more than
//! once, only the first call installs anything.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line records.
    #[default]
    Text,
    /// Newline-delimited JSON, one object per event.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Filter used when `RUST_LOG` is unset: dockflow crates at `level`,
/// everything else at `warn`.
pub fn default_directive(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    format!(
        "warn,dockflow={level},dockflow_core={level},dockflow_sched={level},dockflow_modules={level}"
    )
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_tracing(format: LogFormat, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok(),
    };
}
