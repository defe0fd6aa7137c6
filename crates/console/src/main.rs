//! Tabvm console
//!
//! Runs a serial-console command as a snapshot-persistent machine on the
//! local terminal, and manages the persisted snapshot slot.

mod capture;
mod clipboard;
mod console;
mod keymap;
mod pty;
mod pump;
mod raw_mode;
mod ui;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tabvm_core::types::Snapshot;
use tabvm_core::{
    AnyFetcher, FileBackend, HttpFetcher, KvBackend, LocalFetcher, Session, SessionCommand,
    SessionConfig, SessionDeps, SessionExit, SnapshotStore, StateFetcher, StoreHandle,
};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::clipboard::ArboardClipboard;
use crate::console::ConsoleRenderer;
use crate::pty::{ConsoleCommand, PtyLauncher, DEFAULT_CAPTURE_BYTES};
use crate::pump::InputPump;
use crate::raw_mode::TerminalGuard;
use crate::ui::ConsoleUi;

const LOG_FILE_NAME: &str = "tabvm.log";

/// Tabvm - snapshot-persistent serial console
#[derive(Parser, Debug)]
#[command(name = "tabvm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a serial console whose state survives restarts", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// JSON session configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the persisted snapshot
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a console command as the machine
    Run {
        /// Directory exports are written to (and imported from)
        #[arg(long, default_value = ".")]
        export_dir: PathBuf,

        /// Prompt text that marks the end of boot
        #[arg(long)]
        sentinel: Option<String>,

        /// Default state location (path or http(s) URL)
        #[arg(long, conflicts_with = "no_default")]
        default_state: Option<String>,

        /// Never fall back to a default state
        #[arg(long, default_value_t = false)]
        no_default: bool,

        /// Console capture size in bytes
        #[arg(long)]
        capture_bytes: Option<usize>,

        /// Console command and its arguments
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },
    /// Describe the persisted snapshot
    Show,
    /// Write the persisted snapshot to a file
    Export { file: PathBuf },
    /// Replace the persisted snapshot with a file's contents
    Import { file: PathBuf },
    /// Delete the persisted snapshot
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // The terminal is in raw mode while running, so logs go to a file
    let log_file = match (&cli.command, cli.log_file.clone()) {
        (_, Some(path)) => Some(path),
        (Command::Run { .. }, None) => Some(data_dir.join(LOG_FILE_NAME)),
        _ => None,
    };
    setup_logging(&cli.log_level, log_file.as_deref())?;

    let mut config = load_config(cli.config.as_deref())?;
    let backend: Arc<dyn KvBackend> = Arc::new(FileBackend::new(&data_dir));

    match cli.command {
        Command::Run {
            export_dir,
            sentinel,
            default_state,
            no_default,
            capture_bytes,
            cmd,
        } => {
            if let Some(sentinel) = sentinel {
                config = config.with_sentinel(sentinel);
                config.validate()?;
            }
            if no_default {
                config = config.with_default_state(None);
            } else if default_state.is_some() {
                config = config.with_default_state(default_state);
            }
            let command = ConsoleCommand::from_argv(&cmd).context("Missing console command")?;
            run(
                config,
                backend,
                command,
                export_dir,
                capture_bytes.unwrap_or(DEFAULT_CAPTURE_BYTES),
            )
            .await
        }
        Command::Show => show(&open_store(backend, &config).await?).await,
        Command::Export { file } => export(&open_store(backend, &config).await?, &file).await,
        Command::Import { file } => import(&open_store(backend, &config).await?, &file).await,
        Command::Clear => {
            open_store(backend, &config).await?.delete().await?;
            println!("Saved state cleared");
            Ok(())
        }
    }
}

/// Run sessions until the user quits, relaunching after a reboot
async fn run(
    config: SessionConfig,
    backend: Arc<dyn KvBackend>,
    command: ConsoleCommand,
    export_dir: PathBuf,
    capture_bytes: usize,
) -> Result<()> {
    info!("Starting tabvm v{}", env!("CARGO_PKG_VERSION"));
    info!("Console command: {} {:?}", command.program, command.args);

    let fetcher: Arc<dyn StateFetcher> =
        Arc::new(AnyFetcher::new(HttpFetcher::new(), LocalFetcher::new()));
    let launcher =
        Arc::new(PtyLauncher::new(command, fetcher.clone()).with_capture_bytes(capture_bytes));

    let _terminal = TerminalGuard::enable().context("Failed to enter raw mode")?;
    let renderer = Arc::new(ConsoleRenderer::stdout());
    let ui = Arc::new(ConsoleUi::stdout());
    let clipboard = Arc::new(ArboardClipboard::new());

    let (tx, mut rx) = mpsc::channel(16);
    InputPump::new(
        renderer.clone(),
        ui.clone(),
        tx.clone(),
        export_dir,
        config.export_file_name.clone(),
    )
    .spawn();
    spawn_signal_handler(tx);

    loop {
        let deps = SessionDeps {
            launcher: launcher.clone(),
            renderer: renderer.clone(),
            clipboard: clipboard.clone(),
            notifier: ui.clone(),
            backend: backend.clone(),
            fetcher: fetcher.clone(),
        };
        let mut session = Session::start(deps, config.clone())
            .await
            .context("Failed to start session")?;
        info!("Session ready ({:?})", session.boot_path());

        match session.run(&mut rx).await? {
            SessionExit::Shutdown => break,
            SessionExit::Reboot => info!("Rebooting"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Deliver SIGTERM as a shutdown command
fn spawn_signal_handler(commands: mpsc::Sender<SessionCommand>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM, shutting down...");
                    let _ = commands.send(SessionCommand::Shutdown).await;
                }
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    });
    #[cfg(not(unix))]
    drop(commands);
}

async fn open_store(backend: Arc<dyn KvBackend>, config: &SessionConfig) -> Result<StoreHandle> {
    let store = SnapshotStore::new(backend, config.store.clone());
    store.open().await.context("Failed to open state store")
}

async fn show(handle: &StoreHandle) -> Result<()> {
    let Some(record) = handle.get_record().await else {
        println!("No saved state");
        return Ok(());
    };
    println!("Key:      {}", record.key);
    println!("Encoded:  {} bytes", record.encoded_payload.len());
    match record.decode() {
        Ok(snapshot) => println!("Snapshot: {} bytes", snapshot.len()),
        Err(e) => println!("Snapshot: unreadable ({})", e),
    }
    Ok(())
}

async fn export(handle: &StoreHandle, file: &Path) -> Result<()> {
    let Some(snapshot) = handle.get().await else {
        bail!("No saved state to export");
    };
    std::fs::write(file, snapshot.as_bytes())
        .with_context(|| format!("Failed to write {}", file.display()))?;
    println!("Exported {} bytes to {}", snapshot.len(), file.display());
    Ok(())
}

async fn import(handle: &StoreHandle, file: &Path) -> Result<()> {
    let data =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let snapshot = Snapshot::from(data);
    handle.put(&snapshot).await?;
    println!("Imported {} bytes from {}", snapshot.len(), file.display());
    Ok(())
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("tabvm"))
        .context("No data directory on this platform; pass --data-dir")
}

/// Read the JSON config, or the defaults when no file is given
fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: SessionConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Setup logging with tracing
fn setup_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    match file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
