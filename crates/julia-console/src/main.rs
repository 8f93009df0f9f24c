//! # Julia Console
//!
//! Headless driver for the editor-embedded Julia REPL console.
//!
//! ## Overview
//!
//! The binary activates the console, boots the runtime on the first Enter
//! and mirrors the REPL screen to stdout. Lines read from stdin are sent to
//! the runtime; lines starting with `:` run console commands
//! (`:open-console`, `:clear-console`, `:copy-or-interrupt`,
//! `:new-terminal`, `:quit`). `:open-link <row> <col>` follows the link at
//! a screen position and `:key <keystroke>` sends a single key through the
//! keybinding gate.
//!
//! Logs go to stderr. `RUST_LOG` overrides the configured level.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use julia_console::{
    Command, CommandOutcome, Console, ConsoleHost, ProcessBooter, Workspace, INTERRUPT_COMMAND,
};
use julia_console_core::{ConsoleConfig, Dimensions, Key, KeyEvent, Platform, Position, Result};
use julia_console_session::{
    Booter, DirectoryPicker, NativePtySpawner, OpenOptions, Opener, PersistedTerminal,
};
use julia_console_terminal::TerminalSurface;

struct LogWorkspace;

impl Workspace for LogWorkspace {
    fn update(&self) {
        tracing::info!("Workspace refresh requested");
    }
}

struct PrintOpener;

impl Opener for PrintOpener {
    fn open(&self, path: &str, line: u32, _options: OpenOptions) -> Result<()> {
        eprintln!("open {}:{}", path, line + 1);
        Ok(())
    }
}

/// Always answers with the current directory.
struct CurrentDirPicker;

impl DirectoryPicker for CurrentDirPicker {
    fn pick(&self, _roots: &[PathBuf]) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        if let Ok(cwd) = std::env::current_dir() {
            let _ = tx.send(cwd.to_string_lossy().into_owned());
        }
        rx
    }
}

fn state_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("julia-console").join("terminals.json"))
}

fn load_persisted(path: Option<&Path>) -> Vec<PersistedTerminal> {
    let Some(path) = path else {
        return Vec::new();
    };
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable {}: {}", path.display(), e);
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

fn save_persisted(path: Option<&Path>, items: &[PersistedTerminal]) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(items)?)
        .with_context(|| format!("writing {}", path.display()))
}

fn parse_position(text: &str) -> Option<Position> {
    let mut parts = text.split_whitespace();
    let row = parts.next()?.parse().ok()?;
    let col = parts.next()?.parse().ok()?;
    Some(Position::new(row, col))
}

fn render(console: &Console) {
    let screen = console.terminal().contents();
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "\x1b[H\x1b[2J{screen}");
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1));

    let config = match config_path {
        Some(path) => ConsoleConfig::from_file(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => ConsoleConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Julia console v{} starting...", env!("CARGO_PKG_VERSION"));

    let booter = ProcessBooter::new(config.boot.clone(), Dimensions::default());
    let runtime_booter: Arc<dyn Booter> = booter.clone();
    let state_path = state_file();
    let host = ConsoleHost {
        workspace: Arc::new(LogWorkspace),
        opener: Arc::new(PrintOpener),
        picker: Arc::new(CurrentDirPicker),
        spawner: Arc::new(NativePtySpawner),
        booter: Some(runtime_booter),
        linter: None,
        project_roots: std::env::current_dir().into_iter().collect(),
        persisted: load_persisted(state_path.as_deref()),
        platform: Platform::detect(),
    };

    let Some(console) = Console::activate(&config, host).await else {
        tracing::info!("Console not activated, exiting");
        return Ok(());
    };

    let session = Arc::downgrade(console.session());
    booter.set_failure_handler(move |e| {
        if let Some(session) = session.upgrade() {
            session.boot_failed(e);
        }
    });

    console.execute(Command::OpenConsole).await?;
    render(&console);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(16));

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if let Some(name) = line.strip_prefix(':') {
                    if name == "quit" {
                        break;
                    }
                    if let Some(rest) = name.strip_prefix("open-link ") {
                        match parse_position(rest) {
                            Some(position) => match console.open_link(position).await {
                                Ok(true) => {}
                                Ok(false) => tracing::info!("No link at {:?}", position),
                                Err(e) => tracing::warn!("Opening link failed: {}", e),
                            },
                            None => tracing::warn!("Usage: :open-link <row> <col>"),
                        }
                        render(&console);
                        continue;
                    }
                    if let Some(keystroke) = name.strip_prefix("key ") {
                        match console.press(keystroke.trim()) {
                            Ok(outcome) => tracing::debug!("{}: {:?}", keystroke, outcome),
                            Err(e) => tracing::warn!("{}", e),
                        }
                        render(&console);
                        continue;
                    }
                    match name.parse::<Command>() {
                        Ok(command) => match console.execute(command).await {
                            Ok(CommandOutcome::Copied(text)) => println!("{text}"),
                            Ok(CommandOutcome::Dispatch(INTERRUPT_COMMAND)) => {
                                if let Err(e) = console.terminal().send_input(&[0x03]) {
                                    tracing::debug!("Interrupt not sent: {}", e);
                                }
                            }
                            Ok(outcome) => tracing::info!("{}: {:?}", command, outcome),
                            Err(e) => tracing::error!("{} failed: {}", command, e),
                        },
                        Err(e) => tracing::warn!("{}", e),
                    }
                } else if console.terminal().is_attached() {
                    let input = format!("{line}\r");
                    if let Err(e) = console.terminal().send_input(input.as_bytes()) {
                        tracing::warn!("Input dropped: {}", e);
                    }
                } else {
                    console.terminal().handle_key(&KeyEvent::new(Key::Enter));
                }
                render(&console);
            }
            _ = tick.tick() => {
                if console.pump() > 0 {
                    render(&console);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    let persisted = console.deactivate();
    save_persisted(state_path.as_deref(), &persisted)?;
    tracing::info!("Julia console shutting down");

    Ok(())
}
