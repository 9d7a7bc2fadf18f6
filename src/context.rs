use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;

use crate::{config::Config, normalize::PlaybackSettings, rewrite::Endpoints, token::SigningKey};

/// Immutable, process-wide inputs of both pipelines.
///
/// Built once at startup; share it behind an `Arc` across request handlers.
#[derive(Debug, Clone)]
pub struct GatewayContext {
    pub endpoints: Endpoints,
    pub signing_key: SigningKey,
    pub playback: PlaybackSettings,
}

impl GatewayContext {
    pub fn new(endpoints: Endpoints, signing_key: SigningKey, playback: PlaybackSettings) -> Self {
        Self {
            endpoints,
            signing_key,
            playback,
        }
    }

    /// Validates endpoints and loads the signing key named by `config`.
    ///
    /// A relative `signing.private_key_path` is resolved against `base_dir`.
    pub fn from_config(config: &Config, base_dir: &Path) -> anyhow::Result<Self> {
        let endpoints = Endpoints::from_config(&config.endpoints).context("load endpoints")?;

        let key_path = resolve_relative(base_dir, &config.signing.private_key_path);
        let pem = fs::read(&key_path)
            .with_context(|| format!("read signing key {}", key_path.display()))?;
        let signing_key = SigningKey::from_pem(&pem, config.signing.kid.clone())
            .with_context(|| format!("load signing key {}", key_path.display()))?;

        tracing::info!(
            proxy = endpoints.proxy_url(),
            upstream = endpoints.upstream_authority(),
            cdn = endpoints.cdn_authority(),
            kid = signing_key.kid(),
            "gateway context loaded"
        );

        Ok(Self::new(
            endpoints,
            signing_key,
            PlaybackSettings {
                userinfo_access_token: config.playback.userinfo_access_token.clone(),
            },
        ))
    }

    /// Reads the config file and resolves key paths relative to its directory.
    pub fn load(config_path: &Path) -> anyhow::Result<(Config, Self)> {
        let config = Config::from_path(config_path)?;
        let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let context = Self::from_config(&config, base_dir)?;
        Ok((config, context))
    }
}

fn resolve_relative(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
