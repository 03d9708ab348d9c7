//! Process-wide log output for the engine.
//!
//! `RUST_LOG` overrides the configured level. Evaluation emits `debug`
//! events for cycles and depth exhaustion and `trace` events for each
//! relation it evaluates.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Level and output format of the engine's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    pub level: Level,
    /// One JSON object per line instead of text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
        }
    }
}

/// Installs the global subscriber writing to stdout.
///
/// Returns `false` when a subscriber was already installed, in which case
/// the existing one is kept.
pub fn init_logging(config: LoggingConfig) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(config.level))
        .with(output_layer(config.json, std::io::stdout))
        .try_init()
        .is_ok()
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

fn output_layer<S, W>(json: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_target(true);
    if json {
        layer.json().with_current_span(true).boxed()
    } else {
        layer.with_ansi(false).boxed()
    }
}
