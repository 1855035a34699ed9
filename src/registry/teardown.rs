//! Registry teardown.
//!
//! Stopping the process and removing the auth entry are independent: each
//! is attempted unconditionally and a failure in one never skips the other.
//! Failures are logged and reported, not returned, so a flaky teardown cannot
//! mask the outcome of the test run that preceded it.

use tracing::{info, info_span, warn};

use crate::registry::npm_config::{ConfigStore, RegistryConfigWriter};
use crate::registry::session::SessionSlot;

/// Result of a teardown call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReport {
    /// No session was active; nothing was done.
    NoSession,
    /// A session was torn down.
    Completed {
        /// Port of the torn-down registry.
        port: u16,
        /// Failure signalling the process, if any.
        kill_error: Option<String>,
        /// Failure removing the auth entry, if any.
        revert_error: Option<String>,
    },
}

impl TeardownReport {
    /// `true` for a no-op or a teardown without warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        match self {
            Self::NoSession => true,
            Self::Completed {
                kill_error,
                revert_error,
                ..
            } => kill_error.is_none() && revert_error.is_none(),
        }
    }
}

/// Stop the active registry and remove its auth entry.
///
/// The slot is emptied before either effect runs, so it is clear afterwards
/// whatever happens. Calling this with an empty slot is a no-op.
pub fn teardown<S: ConfigStore>(
    slot: &SessionSlot,
    writer: &RegistryConfigWriter<S>,
) -> TeardownReport {
    let Some(mut session) = slot.take() else {
        info!("no local registry session to tear down");
        return TeardownReport::NoSession;
    };

    let port = session.port();
    let _span = info_span!("teardown", session_id = session.id(), port).entered();

    let kill_error = session.process().kill().err().map(|err| {
        warn!(%err, "failed to stop local registry process");
        err.to_string()
    });

    let revert_error = writer.revert(port).err().map(|err| {
        warn!(%err, "failed to remove local registry auth token");
        err.to_string()
    });

    session.stop();
    info!(
        state = ?session.state(),
        clean = kill_error.is_none() && revert_error.is_none(),
        "local registry torn down"
    );

    TeardownReport::Completed {
        port,
        kill_error,
        revert_error,
    }
}
