// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;

use vigild::checks::CheckRegistry;
use vigild::config::AgentConfig;
use vigild::instance::MANIFEST_FILE;
use vigild::{pidfile, Supervisor};

#[derive(Parser)]
#[command(
    name = "vigild",
    about = "vigild — single-host monitoring agent daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Data directory holding agent.toml, config.toml, and the pidfile
    #[arg(long, env = "VIGILD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VIGILD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "VIGILD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Worker threads for check execution
    #[arg(long, env = "VIGILD_POOL_SIZE")]
    pool_size: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent in the foreground (default when no subcommand given).
    ///
    /// Examples:
    ///   vigild serve
    ///   vigild
    Serve,
    /// Start the agent in the background and write a pidfile.
    ///
    /// Exit code 1 if an agent is already running for this data directory,
    /// 2 if the instance manifest does not exist.
    ///
    /// Examples:
    ///   vigild start
    ///   vigild start --foreground
    Start {
        /// Stay in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },
    /// Stop a running agent by sending it a terminate signal.
    ///
    /// Exit code 1 if no agent is running, 2 if the instance does not exist.
    Stop,
    /// Report whether an agent is running for this data directory.
    ///
    /// Exit code 0 if running, 1 if stopped, 2 if the instance does not exist.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once — must happen before any tracing calls.
    let config = AgentConfig::new(args.data_dir, args.log, args.pool_size);
    let _file_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    match args.command {
        None | Some(Command::Serve) => run_serve(config).await?,
        Some(Command::Start { foreground }) => {
            require_instance(&config);
            if foreground {
                run_serve(config).await?;
            } else {
                start_detached(&config, args.log_file.as_deref())?;
            }
        }
        Some(Command::Stop) => {
            require_instance(&config);
            std::process::exit(run_stop(&config));
        }
        Some(Command::Status) => {
            require_instance(&config);
            std::process::exit(run_status(&config));
        }
    }

    Ok(())
}

/// Exit with code 2 when the instance manifest is missing.
fn require_instance(config: &AgentConfig) {
    let manifest = config.data_dir.join(MANIFEST_FILE);
    if !manifest.exists() {
        eprintln!("no such instance: {}", manifest.display());
        std::process::exit(2);
    }
}

async fn run_serve(config: AgentConfig) -> Result<()> {
    if let Some(pid) = pidfile::read(&config.data_dir) {
        if pidfile::is_alive(pid) {
            eprintln!("vigild is already running (pid {pid})");
            std::process::exit(1);
        }
        // Stale pidfile from an unclean exit.
        pidfile::remove(&config.data_dir);
    }

    pidfile::write(&config.data_dir, std::process::id())
        .context("failed to write pidfile")?;
    info!(data_dir = %config.data_dir.display(), pid = std::process::id(), "vigild starting");

    let data_dir = config.data_dir.clone();
    let supervisor = Supervisor::new(config, CheckRegistry::builtin());
    let result = supervisor.run_forever().await;

    pidfile::remove(&data_dir);
    result
}

/// Re-exec ourselves detached, running `serve` against the same data dir.
fn start_detached(config: &AgentConfig, log_file: Option<&std::path::Path>) -> Result<()> {
    if let Some(pid) = pidfile::read(&config.data_dir) {
        if pidfile::is_alive(pid) {
            eprintln!("vigild is already running (pid {pid})");
            std::process::exit(1);
        }
    }

    let exe = std::env::current_exe().context("failed to locate own binary")?;
    let child = std::process::Command::new(exe)
        .args(serve_args(config, log_file))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to spawn background agent")?;

    println!("vigild started (pid {})", child.id());
    Ok(())
}

/// Arguments for the detached `serve` child. The settings resolved for
/// `start` are forwarded explicitly so the child does not depend on our
/// environment surviving.
fn serve_args(config: &AgentConfig, log_file: Option<&std::path::Path>) -> Vec<std::ffi::OsString> {
    let mut args: Vec<std::ffi::OsString> = vec![
        "serve".into(),
        "--data-dir".into(),
        config.data_dir.clone().into(),
        "--log".into(),
        config.log.clone().into(),
        "--pool-size".into(),
        config.check_pool_size.to_string().into(),
    ];
    if let Some(path) = log_file {
        args.push("--log-file".into());
        args.push(path.into());
    }
    args
}

fn run_stop(config: &AgentConfig) -> i32 {
    let Some(pid) = pidfile::read(&config.data_dir) else {
        eprintln!("vigild is not running");
        return 1;
    };
    if !pidfile::is_alive(pid) {
        eprintln!("vigild is not running (stale pidfile)");
        pidfile::remove(&config.data_dir);
        return 1;
    }
    if let Err(e) = pidfile::terminate(pid) {
        eprintln!("failed to stop pid {pid}: {e}");
        return 1;
    }

    // Give the agent a moment to tear down cleanly.
    for _ in 0..50 {
        if !pidfile::is_alive(pid) {
            pidfile::remove(&config.data_dir);
            println!("vigild stopped");
            return 0;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    eprintln!("vigild (pid {pid}) did not stop within 5s");
    1
}

fn run_status(config: &AgentConfig) -> i32 {
    match pidfile::read(&config.data_dir) {
        Some(pid) if pidfile::is_alive(pid) => {
            println!("vigild is running (pid {pid})");
            0
        }
        _ => {
            println!("vigild is stopped");
            1
        }
    }
}

/// Initialize the tracing subscriber: stdout always, plus an optional
/// daily-rolling log file. Returns the file writer's guard, which must stay
/// alive for the process lifetime.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let (file_writer, guard) = match log_file.and_then(open_log_appender) {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(EnvFilter::new(log_level));
    if log_format == "json" {
        registry
            .with(fmt::layer().json())
            .with(file_writer.map(|w| fmt::layer().json().with_writer(w)))
            .init();
    } else {
        registry
            .with(fmt::layer().compact())
            .with(file_writer.map(|w| fmt::layer().compact().with_writer(w)))
            .init();
    }
    guard
}

/// Open a non-blocking daily-rolling appender for `path`. A log directory
/// that cannot be created downgrades to stdout-only logging; never panics.
fn open_log_appender(
    path: &std::path::Path,
) -> Option<(
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let filename = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("vigild.log"));
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "warn: could not create log directory '{}': {e}; logging to stdout only",
            dir.display()
        );
        return None;
    }
    Some(tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, filename)))
}
