//! Registry child process spawner.
//!
//! Launches `<launcher> run <target> --location none --clear true` with:
//! - stdin and stderr inherited so the operator sees diagnostics;
//! - stdout piped and streamed as raw chunks into a [`ChildEvent`] channel;
//! - an exit monitor task that owns the [`Child`] and reports its exit on
//!   the same channel, independent of any text parsing.
//!
//! Once the startup listener drops its receiver, the output task keeps
//! draining stdout so the registry never blocks on a full pipe.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::registry::lifecycle::ChildEvent;
use crate::{AppError, Result};

/// Time a signalled registry gets to exit before it is force-killed.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Capacity of the child event channel.
const EVENT_BUFFER: usize = 64;

/// Size of each stdout read.
const READ_CHUNK: usize = 8 * 1024;

/// What to launch and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    /// Logical target naming the registry to run (e.g., `workspace:local-registry`).
    pub target: String,
    /// Storage folder override passed as `--storage`.
    pub storage: Option<PathBuf>,
    /// Echo the registry's stdout to this process's stdout.
    pub verbose: bool,
}

impl StartOptions {
    /// Options for `target` with no storage override and quiet output.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            storage: None,
            verbose: false,
        }
    }

    /// Set the storage folder.
    #[must_use]
    pub fn with_storage(mut self, storage: impl Into<PathBuf>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    /// Set output echoing.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check caller preconditions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Usage` if the target is empty.
    pub fn validate(&self) -> Result<()> {
        if self.target.trim().is_empty() {
            return Err(AppError::Usage("registry target is required".into()));
        }
        Ok(())
    }

    /// Arguments appended after the launcher and its own arguments.
    #[must_use]
    pub fn registry_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["run", self.target.as_str()]
            .into_iter()
            .chain(["--location", "none", "--clear", "true"])
            .map(OsString::from)
            .collect();
        if let Some(ref storage) = self.storage {
            args.push("--storage".into());
            args.push(storage.clone().into_os_string());
        }
        args
    }
}

/// Handle to a spawned registry process.
///
/// The [`Child`] itself lives in the exit monitor task; this handle carries
/// the pid and the kill request token. Until a session takes ownership,
/// dropping the handle stops the process.
#[derive(Debug)]
pub struct RegistryProcess {
    pid: Option<u32>,
    cancel: CancellationToken,
    monitor: JoinHandle<()>,
    stop_on_drop: bool,
}

impl Drop for RegistryProcess {
    fn drop(&mut self) {
        if !self.stop_on_drop {
            return;
        }
        if let Err(err) = self.kill() {
            debug!(%err, "abandoned registry process already stopped");
        }
    }
}

impl RegistryProcess {
    /// OS process id, if the child was still running when spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Let the process outlive this handle. Called once a session owns it.
    pub(crate) fn keep_running_on_drop(&mut self) {
        self.stop_on_drop = false;
    }

    /// Whether the exit monitor has observed the process end.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.monitor.is_finished()
    }

    /// Ask the registry to stop without waiting for it.
    ///
    /// On unix the process receives `SIGTERM` immediately; the monitor task
    /// force-kills it if it is still alive after a grace period. Elsewhere
    /// the monitor kills it directly.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the termination signal could not be
    /// delivered (typically because the process is already gone). The kill
    /// request is recorded either way.
    pub fn kill(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        if self.has_exited() {
            // Already reaped; the pid may belong to another process now.
            return Err(AppError::Io("registry process already exited".into()));
        }
        self.signal_terminate()
    }

    #[cfg(unix)]
    fn signal_terminate(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Err(AppError::Io("registry process has no pid".into()));
        };
        let raw = i32::try_from(pid)
            .map_err(|_| AppError::Io(format!("pid {pid} out of range")))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM)
            .map_err(|err| AppError::Io(format!("failed to signal registry pid {pid}: {err}")))
    }

    #[cfg(not(unix))]
    #[allow(clippy::unused_self, clippy::unnecessary_wraps)]
    fn signal_terminate(&self) -> Result<()> {
        Ok(())
    }
}

/// Spawn the registry process and start its output and exit tasks.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the process cannot be created or its stdout
/// cannot be captured.
pub fn spawn_registry(
    config: &RegistryConfig,
    options: &StartOptions,
) -> Result<(RegistryProcess, mpsc::Receiver<ChildEvent>)> {
    let mut cmd = Command::new(&config.launcher);
    cmd.args(&config.launcher_args)
        .args(options.registry_args())
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn {}: {err}", config.launcher))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture registry stdout".into()))?;

    let pid = child.id();
    info!(
        pid = pid.unwrap_or(0),
        launcher = config.launcher,
        target = options.target,
        "local registry process spawned"
    );

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();

    // Detached: ends on its own at EOF.
    drop(spawn_output_reader(stdout, event_tx.clone(), options.verbose));
    let monitor = monitor_exit(child, event_tx, cancel.clone());

    Ok((
        RegistryProcess {
            pid,
            cancel,
            monitor,
            stop_on_drop: true,
        },
        event_rx,
    ))
}

/// Forward stdout chunks as [`ChildEvent::Output`] until the receiver is
/// dropped, then keep draining until EOF.
fn spawn_output_reader(
    mut stdout: ChildStdout,
    event_tx: mpsc::Sender<ChildEvent>,
    verbose: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0_u8; READ_CHUNK];
        let mut echo = tokio::io::stdout();
        let mut forwarding = true;

        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(0) => {
                    debug!("registry stdout closed");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    warn!(%err, "failed to read registry stdout");
                    break;
                }
            };

            let chunk = Bytes::copy_from_slice(&buf[..n]);
            if verbose {
                if let Err(err) = echo.write_all(&chunk).await {
                    debug!(%err, "failed to echo registry output");
                }
            }

            if forwarding && event_tx.send(ChildEvent::Output(chunk)).await.is_err() {
                debug!("startup listener detached; draining registry stdout");
                forwarding = false;
            }
        }
    })
}

/// Await child exit and report it, or terminate the child on request.
fn monitor_exit(
    mut child: Child,
    event_tx: mpsc::Sender<ChildEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let event = match result {
                    Ok(status) => ChildEvent::Exited { code: status.code() },
                    Err(err) => {
                        warn!(%err, "error waiting for registry process");
                        ChildEvent::Failed(format!("wait error: {err}"))
                    }
                };

                if event_tx.send(event.clone()).await.is_err() {
                    warn!(?event, "local registry exited after startup completed");
                } else {
                    info!(?event, "local registry exit");
                }
            }
            () = cancel.cancelled() => {
                stop_child(&mut child).await;
            }
        }
    })
}

async fn stop_child(child: &mut Child) {
    request_kill(child);

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => info!(%status, "local registry stopped"),
        Ok(Err(err)) => warn!(%err, "error waiting for registry process to stop"),
        Err(_) => {
            warn!("registry did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to force-kill registry process");
            }
        }
    }
}

/// On unix the caller has already sent `SIGTERM`.
#[cfg(unix)]
fn request_kill(_child: &mut Child) {}

#[cfg(not(unix))]
fn request_kill(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to kill registry process");
    }
}
