//! Package-manager registry wiring.
//!
//! Points npm and yarn at the ephemeral registry and installs its bearer
//! token. Two classes of state are touched:
//!
//! - process environment (`npm_config_registry`, `YARN_REGISTRY`), inherited
//!   by every tool the test run launches afterwards;
//! - one persistent auth entry, `//localhost:<port>/:_authToken`, written
//!   through a [`ConfigStore`].
//!
//! Only the persistent entry is reverted. The environment is assumed to be
//! disposable.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::registry::port::registry_url;
use crate::{AppError, Result};

/// Environment variable read by npm for the default registry.
pub const NPM_REGISTRY_ENV: &str = "npm_config_registry";

/// Environment variable read by yarn (classic) for the default registry.
pub const YARN_REGISTRY_ENV: &str = "YARN_REGISTRY";

/// Persistent configuration key holding the bearer token for `port`.
#[must_use]
pub fn auth_token_key(port: u16) -> String {
    format!("//localhost:{port}/:_authToken")
}

/// Persistent key/value configuration store for package-manager settings.
pub trait ConfigStore: Send + Sync {
    /// Set `key` to `value`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigWrite` if the store cannot be updated.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigWrite` if the store cannot be updated.
    fn delete(&self, key: &str) -> Result<()>;
}

impl<S: ConfigStore + ?Sized> ConfigStore for Box<S> {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
}

// ── npm CLI store ────────────────────────────────────────────────────────────

/// Store backed by `npm config set` / `npm config delete`.
#[derive(Debug, Clone)]
pub struct NpmCliStore {
    program: String,
    userconfig: Option<PathBuf>,
}

impl NpmCliStore {
    /// Create a store invoking `program`, optionally scoped to a user config file.
    #[must_use]
    pub fn new(program: impl Into<String>, userconfig: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            userconfig,
        }
    }

    /// Build from the `npm_cli` and `npm_userconfig` settings.
    #[must_use]
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.npm_cli.clone(), config.npm_userconfig.clone())
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("config").args(args);
        if let Some(ref path) = self.userconfig {
            cmd.arg("--userconfig").arg(path);
        }

        debug!(program = self.program, ?args, "running npm config command");

        let output = cmd.output().map_err(|err| {
            AppError::ConfigWrite(format!("failed to run {} config: {err}", self.program))
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AppError::ConfigWrite(format!(
                "{} config {} failed ({}): {}",
                self.program,
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )))
        }
    }
}

impl ConfigStore for NpmCliStore {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.run(&["set", key, value])
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.run(&["delete", key])
    }
}

// ── .npmrc file store ────────────────────────────────────────────────────────

/// Store that edits an `.npmrc`-style `key=value` file in place.
///
/// Comments and unrelated lines are preserved. A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct NpmrcFileStore {
    path: PathBuf,
}

impl NpmrcFileStore {
    /// Create a store for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value for `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .read_lines()?
            .iter()
            .find_map(|line| entry_value(line, key).map(str::to_owned)))
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw.lines().map(str::to_owned).collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(AppError::Io(format!(
                "failed to read {}: {err}",
                self.path.display()
            ))),
        }
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body).map_err(|err| {
            AppError::ConfigWrite(format!("failed to write {}: {err}", self.path.display()))
        })
    }
}

/// Value of `line` when it assigns `key`, ignoring surrounding whitespace.
fn entry_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (lhs, rhs) = line.split_once('=')?;
    (lhs.trim() == key).then(|| rhs.trim())
}

impl ConfigStore for NpmrcFileStore {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut lines = self.read_lines().map_err(into_config_write)?;
        lines.retain(|line| entry_value(line, key).is_none());
        lines.push(format!("{key}={value}"));
        self.write_lines(&lines)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut lines = self.read_lines().map_err(into_config_write)?;
        let before = lines.len();
        lines.retain(|line| entry_value(line, key).is_none());
        if lines.len() == before {
            return Ok(());
        }
        self.write_lines(&lines)
    }
}

fn into_config_write(err: AppError) -> AppError {
    match err {
        AppError::Io(msg) => AppError::ConfigWrite(msg),
        other => other,
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Applies and reverts registry wiring for one port at a time.
#[derive(Debug)]
pub struct RegistryConfigWriter<S> {
    store: S,
}

impl<S: ConfigStore> RegistryConfigWriter<S> {
    /// Wrap a persistent store.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Underlying persistent store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Point npm and yarn at `http://localhost:<port>` and install `token`.
    ///
    /// The persistent entry is written first; the environment is only
    /// updated once it succeeds, so a failure leaves nothing half-applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigWrite` if the store rejects the entry.
    pub fn apply(&self, port: u16, token: &str) -> Result<()> {
        off_runtime(|| self.store.set(&auth_token_key(port), token))?;

        let registry = registry_url(port);
        std::env::set_var(NPM_REGISTRY_ENV, &registry);
        std::env::set_var(YARN_REGISTRY_ENV, &registry);

        info!(port, registry, "Set npm and yarn config registry to {registry}");
        Ok(())
    }

    /// Remove the auth entry installed by [`apply`](Self::apply) for `port`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigWrite` if the store cannot be updated.
    pub fn revert(&self, port: u16) -> Result<()> {
        off_runtime(|| self.store.delete(&auth_token_key(port)))?;
        info!(port, "removed local registry auth token");
        Ok(())
    }
}

/// Run a blocking store call without stalling other tasks on a multi-thread
/// runtime. Outside a runtime, or on a current-thread one, `f` runs inline.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}
