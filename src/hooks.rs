//! Test-harness lifecycle entry points.
//!
//! [`LocalRegistry`] is the context object tying one configuration, one
//! package-manager store, and one session slot together. Harnesses that can
//! carry state from global setup to global teardown should hold one
//! directly. Harnesses whose hooks share nothing but the process use
//! [`global_setup`] and [`global_teardown`], which operate on a single
//! process-wide instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tracing::info;

use crate::config::RegistryConfig;
use crate::registry::npm_config::{ConfigStore, NpmCliStore, RegistryConfigWriter};
use crate::registry::process::StartOptions;
use crate::registry::session::{SessionInfo, SessionSlot};
use crate::registry::supervisor::start_registry;
use crate::registry::teardown::{teardown, TeardownReport};
use crate::{AppError, Result};

static GLOBAL: OnceLock<LocalRegistry> = OnceLock::new();

/// Registry lifecycle context: configuration, store, and active session.
pub struct LocalRegistry {
    config: RegistryConfig,
    writer: RegistryConfigWriter<Box<dyn ConfigStore>>,
    slot: SessionSlot,
    starting: AtomicBool,
}

impl std::fmt::Debug for LocalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegistry")
            .field("config", &self.config)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl LocalRegistry {
    /// Create a context writing auth entries through `store`.
    #[must_use]
    pub fn new(config: RegistryConfig, store: impl ConfigStore + 'static) -> Self {
        let store: Box<dyn ConfigStore> = Box::new(store);
        Self {
            config,
            writer: RegistryConfigWriter::new(store),
            slot: SessionSlot::new(),
            starting: AtomicBool::new(false),
        }
    }

    /// Create a context that edits configuration through the npm CLI.
    #[must_use]
    pub fn with_npm_cli(config: RegistryConfig) -> Self {
        let store = NpmCliStore::from_config(&config);
        Self::new(config, store)
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Snapshot of the active session, if any.
    #[must_use]
    pub fn session(&self) -> Option<SessionInfo> {
        self.slot.get()
    }

    /// Start the registry and record its session.
    ///
    /// Resolves once the registry is ready and npm/yarn point at it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Usage` if a session is already active or starting,
    /// or any startup error from
    /// [`start_registry`](crate::registry::supervisor::start_registry).
    pub async fn setup(&self, options: StartOptions) -> Result<SessionInfo> {
        if self.slot.is_active() {
            return Err(AppError::Usage(
                "a local registry session is already active".into(),
            ));
        }
        if self
            .starting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::Usage(
                "a local registry is already starting".into(),
            ));
        }

        let _starting = StartingGuard(&self.starting);

        let session = start_registry(&self.config, &options, &self.writer).await?;
        let info = session.info();
        self.slot.set(session);
        Ok(info)
    }

    /// Stop the registry and remove its auth entry. A no-op without a session.
    pub fn teardown(&self) -> TeardownReport {
        teardown(&self.slot, &self.writer)
    }
}

/// Clears the `starting` flag however setup ends, including cancellation.
struct StartingGuard<'a>(&'a AtomicBool);

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Process-wide context, created on first use from [`RegistryConfig::from_env`].
///
/// # Errors
///
/// Returns `AppError::Config` if the environment names an invalid config file.
pub fn global() -> Result<&'static LocalRegistry> {
    if let Some(registry) = GLOBAL.get() {
        return Ok(registry);
    }
    let config = RegistryConfig::from_env()?;
    Ok(GLOBAL.get_or_init(|| LocalRegistry::with_npm_cli(config)))
}

/// Global-setup hook: start the registry for `options.target`.
///
/// # Errors
///
/// Returns any configuration or startup error; the test run should abort.
pub async fn global_setup(options: StartOptions) -> Result<SessionInfo> {
    let info = global()?.setup(options).await?;
    info!(port = info.port, registry = info.registry_url, "local registry ready");
    Ok(info)
}

/// Global-teardown hook: stop the registry started by [`global_setup`].
pub fn global_teardown() -> TeardownReport {
    GLOBAL
        .get()
        .map_or(TeardownReport::NoSession, LocalRegistry::teardown)
}
