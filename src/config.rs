//! Registry configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Environment variable naming a TOML configuration file.
pub const CONFIG_PATH_ENV: &str = "LOCAL_REGISTRY_CONFIG";

/// Environment variable overriding the configured bearer token.
pub const AUTH_TOKEN_ENV: &str = "LOCAL_REGISTRY_AUTH_TOKEN";

fn default_launcher() -> String {
    "npx".into()
}

fn default_launcher_args() -> Vec<String> {
    vec!["nx".into()]
}

fn default_auth_token() -> String {
    "secretVerdaccioToken".into()
}

fn default_startup_timeout_seconds() -> u64 {
    120
}

fn default_npm_cli() -> String {
    "npm".into()
}

/// Registry orchestration settings parsed from `local-registry.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Program used to run the registry target (e.g., `npx`).
    #[serde(default = "default_launcher")]
    pub launcher: String,
    /// Arguments passed to the launcher before `run <target>`.
    #[serde(default = "default_launcher_args")]
    pub launcher_args: Vec<String>,
    /// Static bearer token installed for the ephemeral registry.
    #[serde(default = "default_auth_token")]
    pub auth_token: String,
    /// Seconds to wait for the ready signal; 0 means no timeout.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    /// npm CLI binary used to edit the persistent configuration.
    #[serde(default = "default_npm_cli")]
    pub npm_cli: String,
    /// Optional npm user config file passed as `--userconfig`.
    #[serde(default)]
    pub npm_userconfig: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            launcher: default_launcher(),
            launcher_args: default_launcher_args(),
            auth_token: default_auth_token(),
            startup_timeout_seconds: default_startup_timeout_seconds(),
            npm_cli: default_npm_cli(),
            npm_userconfig: None,
        }
    }
}

impl RegistryConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    ///
    /// Reads the file named by [`CONFIG_PATH_ENV`] when set, otherwise starts
    /// from defaults, then applies the [`AUTH_TOKEN_ENV`] override.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the named file is unreadable or invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => {
                debug!(path, "loading registry config from environment path");
                Self::load_from_path(path)?
            }
            _ => Self::default(),
        };
        config.apply_token_override();
        config.validate()?;
        Ok(config)
    }

    /// Replace the auth token with [`AUTH_TOKEN_ENV`] when it is set.
    pub fn apply_token_override(&mut self) {
        match env::var(AUTH_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => self.auth_token = token,
            Ok(_) => warn!(key = AUTH_TOKEN_ENV, "auth token override is empty, ignoring"),
            Err(_) => {}
        }
    }

    /// Startup window, or `None` when the timeout is disabled.
    #[must_use]
    pub fn startup_timeout(&self) -> Option<Duration> {
        (self.startup_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.startup_timeout_seconds))
    }

    fn validate(&self) -> Result<()> {
        if self.launcher.trim().is_empty() {
            return Err(AppError::Config("launcher must not be empty".into()));
        }

        if self.auth_token.is_empty() {
            return Err(AppError::Config("auth_token must not be empty".into()));
        }

        if self.npm_cli.trim().is_empty() {
            return Err(AppError::Config("npm_cli must not be empty".into()));
        }

        Ok(())
    }
}
