use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub endpoints: EndpointsConfig,
    pub signing: SigningConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&toml)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        toml.parse()
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).context("parse config TOML")
    }
}

/// Base URLs the gateway rewrites between.
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    /// Public base URL of this gateway.
    pub proxy: String,
    /// Base URL of the real identity provider.
    pub proxied: String,
    /// Static-asset CDN base URL served alongside the identity provider pages.
    pub cdn: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SigningConfig {
    /// PKCS#8 PEM file; relative paths resolve against the config file directory.
    pub private_key_path: PathBuf,
    pub kid: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlaybackConfig {
    /// Access token the userinfo fixture was recorded with.
    pub userinfo_access_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
    /// Emit before/after header tables on the `tapegate::diff` target.
    pub diffs: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}
