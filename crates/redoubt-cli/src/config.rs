//! The optional `config.toml`.
//!
//! Looked up at `--config PATH`, else in the platform config directory
//! (`~/.config/redoubt/config.toml` on Linux). Command-line flags take
//! precedence over every key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr, eyre};
use redoubt_attest::TrustBundle;
use redoubt_verify::{ProvenancePolicy, Verifier};
use serde::Deserialize;

/// User agent sent with HTTP requests unless configured otherwise.
pub const DEFAULT_USER_AGENT: &str = concat!("redoubt/", env!("CARGO_PKG_VERSION"));

/// Install deadline in seconds unless configured otherwise.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Trust bundle JSON.
    pub trust_bundle: Option<PathBuf>,
    /// Provenance policy JSON.
    pub policy: Option<PathBuf>,
    /// Default install directory.
    pub install_dir: Option<PathBuf>,
    /// Default install deadline.
    pub timeout_secs: Option<u64>,
    /// HTTP user agent.
    pub user_agent: Option<String>,
}

/// The platform default config file location.
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "redoubt", "redoubt")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load `explicit`, or the default file if it exists, or nothing.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .wrap_err_with(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Build a verifier from the trust bundle and policy, flags first.
    pub fn verifier(
        &self,
        trust_flag: Option<&Path>,
        policy_flag: Option<&Path>,
    ) -> Result<Verifier> {
        let trust_path = trust_flag
            .or(self.trust_bundle.as_deref())
            .ok_or_else(|| {
                eyre!("no trust bundle: pass --trust-bundle or set `trust_bundle` in config.toml")
            })?;
        let policy_path = policy_flag.or(self.policy.as_deref()).ok_or_else(|| {
            eyre!("no provenance policy: pass --policy or set `policy` in config.toml")
        })?;

        let trust = TrustBundle::load(trust_path)
            .wrap_err_with(|| format!("failed to load trust bundle {}", trust_path.display()))?;
        let policy = ProvenancePolicy::from_file(policy_path)
            .wrap_err_with(|| format!("failed to load policy {}", policy_path.display()))?;
        Ok(Verifier::new(Arc::new(trust), Arc::new(policy)))
    }

    /// Install deadline: flag, else config, else the default.
    pub fn timeout_secs(&self, flag: Option<u64>) -> u64 {
        flag.or(self.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// HTTP user agent.
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}
