//! Active registry session and the slot that holds it between setup and
//! teardown.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::registry::lifecycle::LifecycleState;
use crate::registry::port::registry_url;
use crate::registry::process::RegistryProcess;

/// One running registry instance.
#[derive(Debug)]
pub struct RegistrySession {
    id: String,
    process: RegistryProcess,
    port: u16,
    auth_token: String,
    state: LifecycleState,
    started_at: DateTime<Utc>,
}

impl RegistrySession {
    /// Record a registry that announced readiness on `port`.
    ///
    /// The session takes ownership of the process: dropping it no longer
    /// stops the registry.
    #[must_use]
    pub fn new(mut process: RegistryProcess, port: u16, auth_token: String) -> Self {
        process.keep_running_on_drop();
        Self {
            id: Uuid::new_v4().to_string(),
            process,
            port,
            auth_token,
            state: LifecycleState::Ready,
            started_at: Utc::now(),
        }
    }

    /// `Ready` while running, `Stopped` once torn down.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// `Ready → Stopped`.
    pub fn stop(&mut self) {
        if self.state == LifecycleState::Ready {
            self.state = LifecycleState::Stopped;
        }
    }

    /// Log correlation identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Port the registry listens on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://localhost:<port>`.
    #[must_use]
    pub fn registry_url(&self) -> String {
        registry_url(self.port)
    }

    /// Bearer token installed for this registry.
    #[must_use]
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Handle to the registry process.
    #[must_use]
    pub fn process(&self) -> &RegistryProcess {
        &self.process
    }

    /// Serializable snapshot of this session.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            port: self.port,
            registry_url: self.registry_url(),
            pid: self.process.pid(),
            state: self.state,
            started_at: self.started_at,
        }
    }
}

/// Point-in-time view of a [`RegistrySession`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionInfo {
    /// Session identifier.
    pub id: String,
    /// Port the registry listens on.
    pub port: u16,
    /// Registry URL derived from the port.
    pub registry_url: String,
    /// Registry process id.
    pub pid: Option<u32>,
    /// Lifecycle state at snapshot time.
    pub state: LifecycleState,
    /// When the registry became ready.
    pub started_at: DateTime<Utc>,
}

/// Holder for the single active session.
///
/// Setup stores the session; teardown takes it. Clearing the slot does not
/// stop the registry process.
#[derive(Debug, Default)]
pub struct SessionSlot {
    inner: Mutex<Option<RegistrySession>>,
}

impl SessionSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RegistrySession>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `session`, returning any session it replaced.
    ///
    /// Only one session is expected per process; replacing one is logged.
    pub fn set(&self, session: RegistrySession) -> Option<RegistrySession> {
        let previous = self.lock().replace(session);
        if let Some(ref old) = previous {
            warn!(
                session_id = old.id(),
                port = old.port(),
                "replacing an active local registry session"
            );
        }
        previous
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn get(&self) -> Option<SessionInfo> {
        self.lock().as_ref().map(RegistrySession::info)
    }

    /// Whether a session is stored.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Remove and return the session.
    pub fn take(&self) -> Option<RegistrySession> {
        self.lock().take()
    }

    /// Drop the stored session without signalling its process.
    pub fn clear(&self) {
        drop(self.take());
    }
}
