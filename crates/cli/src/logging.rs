//! Tracing subscriber setup for the command-line driver

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

/// Log output settings, loadable from the `[log]` table of the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Minimum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include file and line in each record
    pub file_info: bool,
    /// Log span enter and exit
    pub spans: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
        }
    }
}

/// Parse a level name, case-insensitively
pub fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => anyhow::bail!("unknown log level '{}'", other),
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` directives still apply; the configured level is added on top.
pub fn init(settings: &LogSettings) -> Result<()> {
    let level = parse_level(&settings.level)?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let span_events = if settings.spans {
        fmt::format::FmtSpan::ENTER | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(settings.file_info)
        .with_line_number(settings.file_info)
        .with_writer(std::io::stderr);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!(e)).context("failed to install tracing subscriber")
}
