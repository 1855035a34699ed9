#![forbid(unsafe_code)]

//! `local-registry`: run an ephemeral package registry around a command.
//!
//! `run` starts the registry, runs a test command against it, and tears it
//! down. `serve` keeps the registry up until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use local_registry::registry::npm_config::NpmrcFileStore;
use local_registry::{AppError, LocalRegistry, RegistryConfig, Result, StartOptions, TeardownReport};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "local-registry", about = "Ephemeral local package registry for e2e tests", version, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Write the auth token to this `.npmrc` file instead of using `npm config`.
    #[arg(long, global = true)]
    npmrc: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Target that runs the registry (e.g., `my-workspace:local-registry`).
    #[arg(long)]
    target: String,

    /// Storage folder for the registry.
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Echo registry output.
    #[arg(long)]
    verbose: bool,
}

impl TargetArgs {
    fn options(&self) -> StartOptions {
        let options = StartOptions::new(self.target.clone()).with_verbose(self.verbose);
        match self.storage {
            Some(ref storage) => options.with_storage(storage),
            None => options,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the registry, run a command against it, then tear it down.
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Command to run once the registry is ready.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Start the registry and keep it up until Ctrl-C or SIGTERM.
    Serve {
        #[command(flatten)]
        target: TargetArgs,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "local registry failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<ExitCode> {
    let mut config = match args.config {
        Some(ref path) => RegistryConfig::load_from_path(path)?,
        None => RegistryConfig::from_env()?,
    };
    config.apply_token_override();

    let registry = match args.npmrc {
        Some(ref path) => LocalRegistry::new(config, NpmrcFileStore::new(path)),
        None => LocalRegistry::with_npm_cli(config),
    };

    match args.command {
        Command::Run { target, command } => run_command(&registry, &target, &command).await,
        Command::Serve { target } => serve(&registry, &target).await,
    }
}

async fn run_command(
    registry: &LocalRegistry,
    target: &TargetArgs,
    command: &[String],
) -> Result<ExitCode> {
    let Some((program, rest)) = command.split_first() else {
        return Err(AppError::Usage("no command given".into()));
    };

    registry.setup(target.options()).await?;

    // Inherits npm_config_registry / YARN_REGISTRY set during setup.
    let status = tokio::process::Command::new(program)
        .args(rest)
        .status()
        .await
        .map_err(|err| AppError::Io(format!("failed to run {program}: {err}")));

    log_report(&registry.teardown());

    let status = status?;
    info!(%status, "command finished");
    Ok(status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from))
}

async fn serve(registry: &LocalRegistry, target: &TargetArgs) -> Result<ExitCode> {
    let info = registry.setup(target.options()).await?;
    let line = serde_json::to_string(&info)
        .map_err(|err| AppError::Io(format!("failed to encode session: {err}")))?;
    println!("{line}");

    shutdown_signal().await;
    info!("shutdown signal received");

    log_report(&registry.teardown());
    Ok(ExitCode::SUCCESS)
}

fn log_report(report: &TeardownReport) {
    if report.is_clean() {
        info!(?report, "teardown complete");
    } else {
        warn!(?report, "teardown completed with warnings");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
