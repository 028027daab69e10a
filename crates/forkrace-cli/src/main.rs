//! forkrace CLI - reproduce a close-on-exec race across a container start

use clap::{Parser, ValueEnum};
use forkrace_core::config::default_lxc_path;
use forkrace_core::container::LxcDriver;
use forkrace_core::introspect::{HelperIntrospector, ProcfsIntrospector};
use forkrace_core::{PipeMode, ProcessIntrospector, RaceConfig, RaceReport, RetryLoop, StopMode};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "forkrace")]
#[command(author, version, about = "Detect descriptors leaking into a container's fork point")]
struct Cli {
    /// Path to the container roots (defaults to FORKRACE_LXCPATH env var or /var/lib/lxc)
    #[arg(long)]
    lxcpath: Option<PathBuf>,

    /// Container to start up
    #[arg(long, default_value = "precise")]
    container_name: String,

    /// Stop after this many clean attempts (0 = until detected)
    #[arg(long, default_value = "0")]
    max_attempts: u64,

    /// Milliseconds between pipe allocations
    #[arg(long, default_value = "10")]
    tick_ms: u64,

    /// How generated pipes get close-on-exec
    #[arg(long, value_enum, default_value = "split")]
    pipe_mode: PipeModeArg,

    /// Whether to wait for the generator before taking inventory
    #[arg(long, value_enum, default_value = "fire-and-forget")]
    stop_mode: StopModeArg,

    /// How process state is read
    #[arg(long, value_enum, default_value = "procfs")]
    introspector: IntrospectorArg,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PipeModeArg {
    Atomic,
    Split,
}

#[derive(Clone, Copy, ValueEnum)]
enum StopModeArg {
    FireAndForget,
    Acknowledged,
}

#[derive(Clone, Copy, ValueEnum)]
enum IntrospectorArg {
    /// Read /proc directly (run as root)
    Procfs,
    /// Shell out to `sudo -n cat` / `sudo -n lsof`
    Helper,
}

impl From<PipeModeArg> for PipeMode {
    fn from(arg: PipeModeArg) -> Self {
        match arg {
            PipeModeArg::Atomic => Self::Atomic,
            PipeModeArg::Split => Self::Split,
        }
    }
}

impl From<StopModeArg> for StopMode {
    fn from(arg: StopModeArg) -> Self {
        match arg {
            StopModeArg::FireAndForget => Self::FireAndForget,
            StopModeArg::Acknowledged => Self::Acknowledged,
        }
    }
}

/// First Ctrl-C lets the current attempt tear down before exiting; a second
/// one returns `true` so the caller can exit immediately
async fn handle_interrupts<F, Fut>(mut interrupted: F, cancel: watch::Sender<bool>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = interrupted().await {
        tracing::warn!(error = %e, "can't listen for interrupts");
        return false;
    }
    tracing::warn!("interrupt received, stopping after the current attempt (again to exit now)");
    let _ = cancel.send(true);

    match interrupted().await {
        Ok(()) => {
            tracing::warn!("second interrupt received, exiting without teardown");
            true
        }
        Err(_) => false,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forkrace=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = RaceConfig::builder()
        .lxcpath(cli.lxcpath.unwrap_or_else(default_lxc_path))
        .container_name(cli.container_name)
        .max_attempts(cli.max_attempts)
        .tick_millis(cli.tick_ms)
        .pipe_mode(cli.pipe_mode.into())
        .stop_mode(cli.stop_mode.into())
        .build()?;

    tracing::info!(
        container = %config.container_name,
        lxcpath = ?config.lxcpath,
        pipe_mode = ?config.pipe_mode,
        stop_mode = ?config.stop_mode,
        "configuration loaded"
    );

    let introspector: Box<dyn ProcessIntrospector> = match cli.introspector {
        IntrospectorArg::Procfs => Box::new(ProcfsIntrospector::default()),
        IntrospectorArg::Helper => Box::new(HelperIntrospector::default()),
    };
    let driver = LxcDriver::new();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if handle_interrupts(tokio::signal::ctrl_c, cancel_tx).await {
            std::process::exit(1);
        }
    });

    let outcome = RetryLoop::new(&driver, &introspector, &config)
        .with_cancellation(cancel_rx)
        .run()
        .await;

    let report = RaceReport::from(&outcome);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }

    Ok(ExitCode::from(report.exit_code()))
}
