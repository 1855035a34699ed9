//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all registry lifecycle failure modes.
///
/// Startup-phase variants (`Usage`, `Spawn`, `PrematureExit`,
/// `StartupTimeout`, `ConfigWrite`) are fatal to the setup hook. Teardown
/// never returns an `AppError`; its failures are logged and reported.
#[derive(Debug)]
pub enum AppError {
    /// Caller error detected before any process is spawned.
    Usage(String),
    /// Registry process could not be created or errored before becoming ready.
    Spawn(String),
    /// Registry process exited before announcing readiness.
    PrematureExit(Option<i32>),
    /// Registry process did not announce readiness within the startup window.
    StartupTimeout(String),
    /// Package-manager configuration store could not be updated.
    ConfigWrite(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "usage: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::PrematureExit(Some(code)) => {
                write!(f, "premature exit: registry exited with code {code}")
            }
            Self::PrematureExit(None) => {
                write!(f, "premature exit: registry terminated by signal")
            }
            Self::StartupTimeout(msg) => write!(f, "startup timeout: {msg}"),
            Self::ConfigWrite(msg) => write!(f, "config write: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
