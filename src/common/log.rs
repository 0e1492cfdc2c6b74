//! Logging setup on top of `tracing`.
//!
//! Library code only emits events; embedding applications call [`init`] once
//! to install a subscriber. JSON lines stay the default production format.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human readable output for interactive sessions.
    Pretty,
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
/// Subsequent calls are no-ops.
pub fn init(format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        let result = match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().flatten_event(true).with_target(true))
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().with_target(true).with_line_number(true))
                .try_init(),
        };
        // Another subscriber may already be installed by the host application.
        let _ = result;
    });
}
