//! Subscriber setup for the CLI. Library code only emits `tracing` events.

use anyhow::anyhow;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

use crate::{
    config::{Config, LogFormat},
    diagnostics::DIFF_TARGET,
};

/// Command-line settings that take precedence over `[logging]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOverrides<'a> {
    pub level: Option<&'a str>,
    /// Turns diff tables on even when the config leaves them off.
    pub diffs: bool,
}

/// Installs the global subscriber writing to stderr; stdout is left for command output.
pub fn init(config: &Config, overrides: LogOverrides<'_>) -> anyhow::Result<()> {
    let filter = log_filter(
        resolve_log_level(config, overrides.level)?,
        overrides.diffs || diffs_enabled(config),
    );

    let installed = match resolve_log_format(config) {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_max_level(LevelFilter::TRACE)
            .with_writer(std::io::stderr)
            .json()
            .finish()
            .with(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_max_level(LevelFilter::TRACE)
            .with_writer(std::io::stderr)
            .pretty()
            .finish()
            .with(filter)
            .try_init(),
    };
    installed.map_err(|err| anyhow!("initialize logging subscriber: {err}"))
}

/// Per-target filter: `level` everywhere, and the diff target either off or at
/// least `debug`.
pub fn log_filter(level: LevelFilter, diffs: bool) -> Targets {
    let diff_level = if diffs {
        level.max(LevelFilter::DEBUG)
    } else {
        LevelFilter::OFF
    };
    Targets::new()
        .with_default(level)
        .with_target(DIFF_TARGET, diff_level)
}

fn resolve_log_level(config: &Config, cli_level: Option<&str>) -> anyhow::Result<LevelFilter> {
    let configured = config
        .logging
        .as_ref()
        .and_then(|logging| logging.level.as_deref());
    let Some(raw) = cli_level.or(configured) else {
        return Ok(LevelFilter::INFO);
    };

    raw.trim().to_ascii_lowercase().parse::<LevelFilter>().map_err(|_| {
        anyhow!("invalid log level `{raw}`; expected one of trace, debug, info, warn, error, off")
    })
}

fn diffs_enabled(config: &Config) -> bool {
    config
        .logging
        .as_ref()
        .and_then(|logging| logging.diffs)
        .unwrap_or(false)
}

fn resolve_log_format(config: &Config) -> LogFormat {
    config
        .logging
        .as_ref()
        .and_then(|logging| logging.format)
        .unwrap_or(LogFormat::Json)
}
