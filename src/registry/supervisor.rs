//! Registry startup supervision.
//!
//! Starts the registry process, waits for its ready signal, and wires up
//! package-manager configuration before reporting success. The caller sees
//! exactly one result, and a successful result is only returned after the
//! auth entry and registry environment are in place.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, info_span, Instrument};

use crate::config::RegistryConfig;
use crate::registry::lifecycle::{ChildEvent, StartupMonitor, StartupOutcome};
use crate::registry::npm_config::{ConfigStore, RegistryConfigWriter};
use crate::registry::process::{spawn_registry, StartOptions};
use crate::registry::session::RegistrySession;
use crate::{AppError, Result};

/// Quiet period after which a port printed at the very end of the output is
/// accepted.
const SETTLE_WINDOW: Duration = Duration::from_millis(250);

/// Start a registry and return its session once it is ready and configured.
///
/// Any failure after the process was spawned terminates it before the error
/// is returned.
///
/// # Errors
///
/// - `AppError::Usage`: empty target; nothing is spawned.
/// - `AppError::Spawn`: the process could not start or errored before ready.
/// - `AppError::PrematureExit`: the process exited before ready.
/// - `AppError::StartupTimeout`: no ready signal within the configured window.
/// - `AppError::ConfigWrite`: the registry started but could not be wired up.
pub async fn start_registry<S: ConfigStore>(
    config: &RegistryConfig,
    options: &StartOptions,
    writer: &RegistryConfigWriter<S>,
) -> Result<RegistrySession> {
    options.validate()?;

    let span = info_span!("start_registry", target = %options.target);
    launch(config, options, writer).instrument(span).await
}

async fn launch<S: ConfigStore>(
    config: &RegistryConfig,
    options: &StartOptions,
    writer: &RegistryConfigWriter<S>,
) -> Result<RegistrySession> {
    let (process, mut events) = spawn_registry(config, options)?;
    let mut monitor = StartupMonitor::new();

    let result = await_ready(
        &mut events,
        &mut monitor,
        writer,
        &config.auth_token,
        config.startup_timeout(),
    )
    .await;
    // Dropping the receiver detaches the ready listener.
    drop(events);

    match result {
        Ok(port) => Ok(RegistrySession::new(
            process,
            port,
            config.auth_token.clone(),
        )),
        Err(err) => {
            error!(%err, state = ?monitor.state(), "local registry failed to start");
            if let Err(kill_err) = process.kill() {
                info!(%kill_err, "registry process already gone");
            }
            Err(err)
        }
    }
}

/// Drive `monitor` with child events until startup settles.
///
/// On the first ready signal, configuration is applied for the discovered
/// port and only then is the port returned. Events after the first terminal
/// one are never read. A port printed as the last bytes of output is
/// accepted once no further output follows within a short settle window.
///
/// # Errors
///
/// Returns the startup failure matching the first terminal event, or
/// `AppError::StartupTimeout` when `timeout` elapses first (the monitor is
/// moved to `Failed`).
pub async fn await_ready<S: ConfigStore>(
    events: &mut mpsc::Receiver<ChildEvent>,
    monitor: &mut StartupMonitor,
    writer: &RegistryConfigWriter<S>,
    token: &str,
    timeout: Option<Duration>,
) -> Result<u16> {
    monitor.begin();

    let waiting = async {
        loop {
            let received = if monitor.pending_port().is_some() {
                tokio::time::timeout(SETTLE_WINDOW, events.recv()).await.ok()
            } else {
                Some(events.recv().await)
            };

            let outcome = match received {
                Some(Some(event)) => monitor.observe(&event),
                Some(None) => {
                    let Some(outcome) = monitor.settle() else {
                        return Err(AppError::Spawn(
                            "registry event stream closed before ready signal".into(),
                        ));
                    };
                    Some(outcome)
                }
                None => monitor.settle(),
            };

            match outcome {
                None => {}
                Some(StartupOutcome::Ready(port)) => {
                    info!(port, "Local registry started on port {port}");
                    return writer.apply(port, token).map(|()| port);
                }
                Some(StartupOutcome::PrematureExit(code)) => {
                    return Err(AppError::PrematureExit(code));
                }
                Some(StartupOutcome::SpawnFailed(detail)) => {
                    return Err(AppError::Spawn(detail));
                }
            }
        }
    };

    let Some(limit) = timeout else {
        return waiting.await;
    };

    let outcome = tokio::time::timeout(limit, waiting).await;
    match outcome {
        Ok(result) => result,
        Err(_elapsed) => {
            monitor.fail();
            Err(AppError::StartupTimeout(format!(
                "registry did not emit a ready signal within {limit:?}"
            )))
        }
    }
}
