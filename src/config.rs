//! Configuration loading and validation.
//!
//! Precedence: environment variables > `config.toml` > defaults. Keys are
//! snake_case; the camelCase names used by web embeddings (`authEndpoint`,
//! `timeout`) are accepted as aliases.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Environment variable overriding [`BridgeConfig::debug`].
pub const ENV_DEBUG: &str = "TOWNPASS_DEBUG";
/// Environment variable overriding [`BridgeConfig::timeout_ms`].
pub const ENV_TIMEOUT_MS: &str = "TOWNPASS_TIMEOUT_MS";
/// Environment variable overriding [`BridgeConfig::auth_endpoint`].
pub const ENV_AUTH_ENDPOINT: &str = "TOWNPASS_AUTH_ENDPOINT";
/// Environment variable overriding [`BridgeConfig::base_url`].
pub const ENV_BASE_URL: &str = "TOWNPASS_BASE_URL";

/// Engine and session-exchange settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Emit a diagnostic trace of every probe, listener and resolution.
    pub debug: bool,

    /// How long a request waits for the host before timing out.
    #[serde(alias = "timeout", alias = "timeoutMs")]
    pub timeout_ms: u64,

    /// Path of the backend session endpoint.
    #[serde(alias = "authEndpoint")]
    pub auth_endpoint: String,

    /// Origin the auth endpoint is resolved against.
    #[serde(alias = "baseUrl")]
    pub base_url: String,

    /// JSON key the identity is sent under.
    #[serde(alias = "identityKey")]
    pub identity_key: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            timeout_ms: default_timeout_ms(),
            auth_endpoint: default_auth_endpoint(),
            base_url: default_base_url(),
            identity_key: default_identity_key(),
        }
    }
}

impl BridgeConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable cannot be parsed.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if a present value cannot be parsed.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(raw) = lookup(ENV_DEBUG) {
            self.debug = parse_flag(&raw)
                .ok_or_else(|| anyhow::anyhow!("{ENV_DEBUG} must be a boolean, got {raw:?}"))?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{ENV_TIMEOUT_MS} must be milliseconds: {e}"))?;
        }
        if let Some(endpoint) = lookup(ENV_AUTH_ENDPOINT) {
            self.auth_endpoint = endpoint;
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        self.validate()
    }

    /// Reject settings the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero timeout, an empty endpoint or identity
    /// key, or an unparseable base URL.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }
        if self.auth_endpoint.trim().is_empty() {
            anyhow::bail!("auth_endpoint must not be empty");
        }
        if self.identity_key.trim().is_empty() {
            anyhow::bail!("identity_key must not be empty");
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| anyhow::anyhow!("invalid base_url {:?}: {e}", self.base_url))?;
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// Default value functions for serde

fn default_timeout_ms() -> u64 {
    3000
}
fn default_auth_endpoint() -> String {
    "/api/auth/townpass".to_owned()
}
fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_owned()
}
fn default_identity_key() -> String {
    "user".to_owned()
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: BridgeConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the default config directory (`~/.townpass-bridge/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".townpass-bridge"))
}

/// Load `~/.townpass-bridge/config.toml` if present, defaults otherwise,
/// then apply environment overrides.
///
/// # Errors
///
/// Returns an error if an existing file is invalid or an override does not
/// parse.
pub fn load_default_config() -> anyhow::Result<BridgeConfig> {
    let path = config_dir()?.join("config.toml");
    let mut config = if path.exists() {
        load_config(&path)?
    } else {
        BridgeConfig::default()
    };
    config.apply_env()?;
    Ok(config)
}
