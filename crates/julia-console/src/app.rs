//! Console activation: builds the REPL terminal and wires every component
//! to the runtime client.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use julia_console_core::{
    ConsoleConfig, ConsoleSettings, ConsoleStyle, Disposables, Error, KeyEvent, Platform,
    Position, Result, TerminalClass, TerminalId,
};
use julia_console_session::{
    AuxiliaryTerminals, Booter, ConsoleSession, DirectoryPicker, KeybindingAllowLists,
    KeybindingGate, ModuleIndicator, Opener, PersistedTerminal, PtySpawner, RpcClient,
    SessionParts, SettingsStore,
};
use julia_console_terminal::{HeadlessTerminal, KeyOutcome, TerminalOptions, TerminalSurface};

use crate::commands::{Command, CommandOutcome, INTERRUPT_COMMAND};
use crate::handlers::{self, LintSink, Workspace};

/// First line of the REPL terminal.
pub const BANNER: &str = "\x1b[1m\x1b[32mPress Enter to start Julia. \x1b[0m\n\r";

/// Editor-side collaborators the console talks to.
pub struct ConsoleHost {
    /// Workspace view refreshed on `updateWorkspace`
    pub workspace: Arc<dyn Workspace>,
    /// Opens validated links
    pub opener: Arc<dyn Opener>,
    /// Prompts for auxiliary terminal directories
    pub picker: Arc<dyn DirectoryPicker>,
    /// Starts auxiliary shells
    pub spawner: Arc<dyn PtySpawner>,
    /// Starts the runtime
    pub booter: Option<Arc<dyn Booter>>,
    /// Receives lint results, if a linter is present
    pub linter: Option<Arc<dyn LintSink>>,
    /// Suggested directories for new terminals
    pub project_roots: Vec<PathBuf>,
    /// Auxiliary terminals saved by a previous run
    pub persisted: Vec<PersistedTerminal>,
    /// Path grammar for links
    pub platform: Platform,
}

/// The activated console.
pub struct Console {
    settings: Arc<SettingsStore>,
    client: Arc<RpcClient>,
    terminal: Arc<HeadlessTerminal>,
    modules: Arc<ModuleIndicator>,
    session: Arc<ConsoleSession>,
    auxiliary: Arc<AuxiliaryTerminals>,
    subscriptions: Mutex<Disposables>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("session", &self.session)
            .field("auxiliary", &self.auxiliary)
            .finish_non_exhaustive()
    }
}

fn repl_terminal(settings: &ConsoleSettings) -> HeadlessTerminal {
    HeadlessTerminal::new(
        TerminalId::repl(),
        TerminalOptions {
            title: "REPL".to_string(),
            class: "julia-terminal".to_string(),
            scrollback: settings.scrollback,
            cursor_style: settings.cursor_style,
            ..TerminalOptions::default()
        },
    )
}

impl Console {
    /// Activate the console. Returns `None` unless the REPL-based console
    /// style is configured.
    pub async fn activate(config: &ConsoleConfig, host: ConsoleHost) -> Option<Arc<Self>> {
        if config.console.style != ConsoleStyle::ReplBased {
            info!(
                "Console style {:?} is not REPL-based; not activating",
                config.console.style
            );
            return None;
        }

        let settings = SettingsStore::new(config.console.clone());
        let mut subscriptions = Disposables::new();

        let lists = KeybindingAllowLists::from_settings(&settings.get());
        for sub in lists.bind(&settings) {
            subscriptions.add(sub);
        }

        let terminal = Arc::new(repl_terminal(&config.console));
        terminal.write(BANNER.as_bytes());
        terminal.set_key_filter(Some(Arc::new(KeybindingGate::new(
            Arc::clone(&lists),
            TerminalClass::Repl,
        ))));

        let client = RpcClient::new();
        if let Some(booter) = host.booter {
            client.set_booter(booter);
        }
        for sub in handlers::register(&client, terminal.clone(), host.workspace) {
            subscriptions.add(sub);
        }
        if let Some(linter) = host.linter {
            for sub in handlers::register_linter(&client, linter) {
                subscriptions.add(sub);
            }
        }

        let modules = ModuleIndicator::new();
        let session = ConsoleSession::new(SessionParts {
            client: Arc::clone(&client),
            terminal: terminal.clone(),
            settings: Arc::clone(&settings),
            modules: Arc::clone(&modules),
            opener: host.opener,
            platform: host.platform,
            module_debounce: Duration::from_millis(config.console.module_debounce_ms),
        });
        session.activate();

        let auxiliary = AuxiliaryTerminals::new(
            Arc::clone(&settings),
            lists,
            host.spawner,
            host.picker,
            host.project_roots,
        );
        if !host.persisted.is_empty() {
            let restored = auxiliary.restore(&host.persisted).await;
            info!(
                "Restored {} of {} auxiliary terminal(s)",
                restored,
                host.persisted.len()
            );
        }

        info!("Console activated");
        Some(Arc::new(Self {
            settings,
            client,
            terminal,
            modules,
            session,
            auxiliary,
            subscriptions: Mutex::new(subscriptions),
        }))
    }

    /// Live settings.
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Runtime client.
    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    /// The REPL terminal.
    pub fn terminal(&self) -> &Arc<HeadlessTerminal> {
        &self.terminal
    }

    /// Module indicator fed by the editor.
    pub fn modules(&self) -> &Arc<ModuleIndicator> {
        &self.modules
    }

    /// REPL session controller.
    pub fn session(&self) -> &Arc<ConsoleSession> {
        &self.session
    }

    /// Auxiliary terminal registry.
    pub fn auxiliary(&self) -> &Arc<AuxiliaryTerminals> {
        &self.auxiliary
    }

    /// Run a command.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome> {
        debug!("Executing {}", command);
        match command {
            Command::OpenConsole => {
                self.terminal.open();
                Ok(CommandOutcome::Opened)
            }
            Command::ClearConsole => {
                self.terminal.clear();
                Ok(CommandOutcome::Cleared)
            }
            Command::CopyOrInterrupt => Ok(match self.terminal.copy_selection() {
                Some(text) => CommandOutcome::Copied(text),
                None => CommandOutcome::Dispatch(INTERRUPT_COMMAND),
            }),
            Command::NewTerminal => match self.auxiliary.new_terminal().await {
                Ok(aux) => Ok(CommandOutcome::Spawned(aux.id().clone())),
                Err(Error::Cancelled) => Ok(CommandOutcome::Cancelled),
                Err(e) => {
                    warn!("New terminal failed: {}", e);
                    Err(e)
                }
            },
        }
    }

    /// Activate the validated link under `position` on the REPL terminal.
    /// `Ok(false)` when no runtime is attached or nothing is linked there.
    pub async fn open_link(&self, position: Position) -> Result<bool> {
        let Some(resolver) = self.session.resolver() else {
            debug!("No session; ignoring link at {:?}", position);
            return Ok(false);
        };
        resolver.activate_at(position).await
    }

    /// Deliver a keystroke such as `ctrl-shift-p` to the REPL terminal.
    pub fn press(&self, keystroke: &str) -> Result<KeyOutcome> {
        let event = KeyEvent::parse(keystroke)?;
        Ok(self.terminal.handle_key(&event))
    }

    /// Close an auxiliary terminal.
    pub fn close_terminal(&self, id: &TerminalId) -> Result<()> {
        if self.auxiliary.close(id) {
            Ok(())
        } else {
            Err(Error::TerminalNotFound(id.clone()))
        }
    }

    /// Move pending output of every terminal onto its screen.
    pub fn pump(&self) -> usize {
        let repl = match self.terminal.pump() {
            Ok(n) => n,
            Err(e) => {
                debug!("REPL pump failed: {}", e);
                0
            }
        };
        repl + self.auxiliary.pump()
    }

    /// Tear everything down. Returns the auxiliary terminals to persist.
    pub fn deactivate(&self) -> Vec<PersistedTerminal> {
        let persisted = self.auxiliary.persist();
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dispose();
        self.session.deactivate();
        self.auxiliary.shutdown();
        info!("Console deactivated");
        persisted
    }
}
