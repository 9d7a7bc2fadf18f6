use std::{fs, path::Path, path::PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::{Serialize, de::DeserializeOwned};
use tapegate::{
    context::GatewayContext,
    logging::{self, LogOverrides},
    matching::match_key,
    message::{CachedResponse, InboundRequest, RequestFixture, ResponseFixture},
    normalize::normalize,
    reconstruct::reconstruct,
    session::{Mode, SessionExtract},
};

#[derive(Debug, Parser)]
#[command(name = "tapegate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Normalize a captured request and print it with its session extract and match key.
    Normalize {
        /// Path to config TOML.
        #[arg(long)]
        config: PathBuf,
        /// Request fixture JSON (`method`, `url`, `headers` as `[name, value]` pairs).
        #[arg(long)]
        request: PathBuf,
        /// Normalize for recording instead of playback.
        #[arg(long)]
        record: bool,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
        /// Log before/after header tables at debug level.
        #[arg(long)]
        diffs: bool,
    },
    /// Rebuild a recorded response for a live session and print it.
    Reconstruct {
        /// Path to config TOML.
        #[arg(long)]
        config: PathBuf,
        /// Response fixture JSON (`status`, `headers`, `body`).
        #[arg(long)]
        response: PathBuf,
        /// Session extract JSON as printed by `normalize`.
        #[arg(long)]
        session: PathBuf,
        /// Reconstruct for recording instead of playback.
        #[arg(long)]
        record: bool,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
        /// Log before/after header tables at debug level.
        #[arg(long)]
        diffs: bool,
    },
}

#[derive(Debug, Serialize)]
struct NormalizeOutput {
    request: RequestFixture,
    session: SessionExtract,
    match_key: String,
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read {what} {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {what} {}", path.display()))
}

fn run_normalize(context: &GatewayContext, request: &Path, mode: Mode) -> anyhow::Result<String> {
    let fixture: RequestFixture = read_json(request, "request fixture")?;
    let request = InboundRequest::try_from(fixture)?;

    let normalized = normalize(&request, mode, &context.playback);
    let output = NormalizeOutput {
        match_key: match_key(&normalized.request),
        request: RequestFixture::from(&normalized.request),
        session: normalized.session,
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

fn run_reconstruct(
    context: &GatewayContext,
    response: &Path,
    session: &Path,
    mode: Mode,
) -> anyhow::Result<String> {
    let fixture: ResponseFixture = read_json(response, "response fixture")?;
    let cached = CachedResponse::try_from(fixture)?;
    let session: SessionExtract = read_json(session, "session extract")?;

    let replay = reconstruct(&cached, &session, context, mode).map_err(|err| {
        tracing::error!(kind = err.kind(), flow = session.flow.as_str(), "{err}");
        anyhow::Error::new(err)
    })?;
    Ok(serde_json::to_string_pretty(&ResponseFixture::from(&replay))?)
}

fn load_context(config: &Path, overrides: LogOverrides<'_>) -> anyhow::Result<GatewayContext> {
    let loaded = tapegate::config::Config::from_path(config)?;
    logging::init(&loaded, overrides)?;
    let base_dir = config.parent().unwrap_or_else(|| Path::new("."));
    GatewayContext::from_config(&loaded, base_dir)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let output = match cli.command {
        Command::Normalize {
            config,
            request,
            record,
            log_level,
            diffs,
        } => {
            let context = load_context(
                &config,
                LogOverrides {
                    level: log_level.as_deref(),
                    diffs,
                },
            )?;
            run_normalize(&context, &request, Mode::from_record_flag(record))?
        }
        Command::Reconstruct {
            config,
            response,
            session,
            record,
            log_level,
            diffs,
        } => {
            let context = load_context(
                &config,
                LogOverrides {
                    level: log_level.as_deref(),
                    diffs,
                },
            )?;
            run_reconstruct(&context, &response, &session, Mode::from_record_flag(record))?
        }
    };
    println!("{output}");

    Ok(())
}
