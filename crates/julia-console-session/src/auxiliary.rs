//! Auxiliary shell terminals.
//!
//! These are plain shells in their own PTYs, unrelated to the runtime
//! session. Each one is keyed by a generated `terminal-julia-<n>` id and
//! remembers its working directory so it can be restored later.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use julia_console_core::{Dimensions, Error, Result, TerminalClass, TerminalId};
use julia_console_terminal::{
    HeadlessTerminal, PtyHandle, PtyStream, TerminalOptions, TerminalSurface,
};

use crate::keybinding::{KeybindingAllowLists, KeybindingGate};
use crate::settings::SettingsStore;

/// Asks the user for a working directory.
pub trait DirectoryPicker: Send + Sync {
    /// Offer `roots` as suggestions. The reply is the chosen path. Dropping
    /// the sender or replying with an empty string cancels.
    fn pick(&self, roots: &[PathBuf]) -> oneshot::Receiver<String>;
}

/// Starts shell processes.
pub trait PtySpawner: Send + Sync {
    /// Spawn `shell` with the given size in `cwd`.
    fn spawn(&self, shell: &str, dimensions: Dimensions, cwd: &Path) -> Result<Arc<dyn PtyStream>>;
}

/// Spawns real pseudo-terminals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, shell: &str, dimensions: Dimensions, cwd: &Path) -> Result<Arc<dyn PtyStream>> {
        let pty = PtyHandle::spawn(shell, &[], dimensions, Some(cwd))?;
        Ok(Arc::new(pty))
    }
}

/// Replace a leading `~` with the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return home;
    }
    match path
        .strip_prefix("~/")
        .or_else(|| path.strip_prefix("~\\"))
    {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Prompt for a directory. Cancellation is [`Error::Cancelled`].
pub async fn select_directory(picker: &dyn DirectoryPicker, roots: &[PathBuf]) -> Result<PathBuf> {
    match picker.pick(roots).await {
        Ok(choice) if !choice.trim().is_empty() => Ok(expand_home(choice.trim())),
        _ => {
            debug!("Directory prompt cancelled");
            Err(Error::Cancelled)
        }
    }
}

/// What survives a restart for one auxiliary terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTerminal {
    /// Generated id
    pub id: TerminalId,
    /// Working directory of the shell
    pub cwd: Option<PathBuf>,
}

/// One auxiliary shell pane.
pub struct AuxiliaryTerminal {
    terminal: Arc<HeadlessTerminal>,
    process: Mutex<Option<(Arc<dyn PtyStream>, PathBuf)>>,
}

impl std::fmt::Debug for AuxiliaryTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuxiliaryTerminal")
            .field("id", self.terminal.id())
            .field("cwd", &self.cwd())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AuxiliaryTerminal {
    fn new(terminal: Arc<HeadlessTerminal>) -> Arc<Self> {
        Arc::new(Self {
            terminal,
            process: Mutex::new(None),
        })
    }

    /// Terminal id.
    pub fn id(&self) -> &TerminalId {
        self.terminal.id()
    }

    /// The terminal surface.
    pub fn terminal(&self) -> &Arc<HeadlessTerminal> {
        &self.terminal
    }

    /// Working directory of the attached shell.
    pub fn cwd(&self) -> Option<PathBuf> {
        lock(&self.process).as_ref().map(|(_, cwd)| cwd.clone())
    }

    /// Whether a shell is attached.
    pub fn is_attached(&self) -> bool {
        lock(&self.process).is_some()
    }

    /// Attach a spawned shell. Only the first attach takes effect.
    fn attach(&self, stream: Arc<dyn PtyStream>, cwd: PathBuf) -> bool {
        let mut process = lock(&self.process);
        if process.is_some() {
            return false;
        }
        self.terminal.attach(Arc::clone(&stream));
        *process = Some((stream, cwd));
        true
    }

    /// Persistable state.
    pub fn persisted(&self) -> PersistedTerminal {
        PersistedTerminal {
            id: self.id().clone(),
            cwd: self.cwd(),
        }
    }

    fn shutdown(&self) {
        let process = lock(&self.process).take();
        self.terminal.detach();
        self.terminal.close();
        if let Some((stream, _)) = process {
            if let Err(e) = stream.kill() {
                debug!("Killing shell of {} failed: {}", self.id(), e);
            }
        }
    }
}

/// Registry of open auxiliary terminals.
pub struct AuxiliaryTerminals {
    settings: Arc<SettingsStore>,
    lists: Arc<KeybindingAllowLists>,
    spawner: Arc<dyn PtySpawner>,
    picker: Arc<dyn DirectoryPicker>,
    roots: Vec<PathBuf>,
    terminals: Mutex<HashMap<TerminalId, Arc<AuxiliaryTerminal>>>,
}

impl std::fmt::Debug for AuxiliaryTerminals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuxiliaryTerminals")
            .field("roots", &self.roots)
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}

impl AuxiliaryTerminals {
    /// Empty registry. `roots` are offered when prompting for a directory.
    pub fn new(
        settings: Arc<SettingsStore>,
        lists: Arc<KeybindingAllowLists>,
        spawner: Arc<dyn PtySpawner>,
        picker: Arc<dyn DirectoryPicker>,
        roots: Vec<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            lists,
            spawner,
            picker,
            roots,
            terminals: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn a shell in `cwd`, or in a directory picked by the user.
    ///
    /// A cancelled prompt fails with [`Error::Cancelled`] before anything is
    /// spawned.
    pub async fn spawn_auxiliary(
        &self,
        cwd: Option<&Path>,
    ) -> Result<(Arc<dyn PtyStream>, PathBuf)> {
        let cwd = match cwd {
            Some(cwd) => expand_home(&cwd.to_string_lossy()),
            None => select_directory(self.picker.as_ref(), &self.roots).await?,
        };
        let shell = self.settings.get().shell.clone();
        let stream = self.spawner.spawn(&shell, Dimensions::auxiliary(), &cwd)?;
        info!("Spawned auxiliary shell '{}' in {}", shell, cwd.display());
        Ok((stream, cwd))
    }

    fn create_terminal(&self, id: TerminalId) -> Arc<AuxiliaryTerminal> {
        let settings = self.settings.get();
        let terminal = HeadlessTerminal::new(
            id,
            TerminalOptions {
                title: "Terminal".to_string(),
                dimensions: Dimensions::auxiliary(),
                scrollback: settings.scrollback,
                cursor_style: settings.cursor_style,
                ..TerminalOptions::default()
            },
        );
        terminal.set_key_filter(Some(Arc::new(KeybindingGate::new(
            Arc::clone(&self.lists),
            TerminalClass::Terminal,
        ))));
        AuxiliaryTerminal::new(Arc::new(terminal))
    }

    /// Open a new auxiliary terminal in a user-picked directory.
    pub async fn new_terminal(&self) -> Result<Arc<AuxiliaryTerminal>> {
        let (stream, cwd) = self.spawn_auxiliary(None).await?;
        Ok(self.register_new(stream, cwd, TerminalId::generate_auxiliary))
    }

    /// Register a spawned shell under the first generated id not in use.
    fn register_new(
        &self,
        stream: Arc<dyn PtyStream>,
        cwd: PathBuf,
        mut generate: impl FnMut() -> TerminalId,
    ) -> Arc<AuxiliaryTerminal> {
        let mut terminals = lock(&self.terminals);
        let id = loop {
            let id = generate();
            if !terminals.contains_key(&id) {
                break id;
            }
            debug!("Auxiliary id {} taken, regenerating", id);
        };
        let aux = self.create_terminal(id);
        aux.attach(stream, cwd);
        aux.terminal().open();
        terminals.insert(aux.id().clone(), Arc::clone(&aux));
        aux
    }

    /// Re-spawn persisted terminals. Items with a foreign id, and terminals
    /// that already have a shell, are skipped. Failures are logged and
    /// skipped. Returns how many were restored.
    pub async fn restore(&self, items: &[PersistedTerminal]) -> usize {
        let mut restored = 0;
        for item in items {
            if !item.id.is_auxiliary() {
                debug!("Not an auxiliary terminal: {}", item.id);
                continue;
            }
            let existing = lock(&self.terminals).get(&item.id).cloned();
            if existing.as_ref().is_some_and(|aux| aux.is_attached()) {
                debug!("{} already attached", item.id);
                continue;
            }

            let aux = existing.unwrap_or_else(|| self.create_terminal(item.id.clone()));
            match self.spawn_auxiliary(item.cwd.as_deref()).await {
                Ok((stream, cwd)) => {
                    if !aux.attach(Arc::clone(&stream), cwd) {
                        // Raced with another restore of the same id
                        let _ = stream.kill();
                        continue;
                    }
                    match lock(&self.terminals).entry(item.id.clone()) {
                        Entry::Occupied(entry) if !Arc::ptr_eq(entry.get(), &aux) => {
                            debug!("{} opened meanwhile", item.id);
                            aux.shutdown();
                            continue;
                        }
                        Entry::Occupied(_) => {}
                        Entry::Vacant(entry) => {
                            entry.insert(aux);
                        }
                    }
                    restored += 1;
                }
                Err(e) => warn!("Could not restore {}: {}", item.id, e),
            }
        }
        restored
    }

    /// Look up a terminal.
    pub fn get(&self, id: &TerminalId) -> Option<Arc<AuxiliaryTerminal>> {
        lock(&self.terminals).get(id).cloned()
    }

    /// Close a terminal's pane and end its shell.
    pub fn close(&self, id: &TerminalId) -> bool {
        let aux = lock(&self.terminals).remove(id);
        match aux {
            Some(aux) => {
                aux.shutdown();
                info!("Closed auxiliary terminal {}", id);
                true
            }
            None => false,
        }
    }

    /// State to persist for every open terminal.
    pub fn persist(&self) -> Vec<PersistedTerminal> {
        let mut items: Vec<_> = lock(&self.terminals)
            .values()
            .map(|aux| aux.persisted())
            .collect();
        items.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        items
    }

    /// Move pending shell output onto every terminal.
    pub fn pump(&self) -> usize {
        let terminals: Vec<_> = lock(&self.terminals).values().cloned().collect();
        terminals
            .iter()
            .map(|aux| match aux.terminal().pump() {
                Ok(n) => n,
                Err(e) => {
                    debug!("Pump of {} failed: {}", aux.id(), e);
                    0
                }
            })
            .sum()
    }

    /// Number of open terminals.
    pub fn len(&self) -> usize {
        lock(&self.terminals).len()
    }

    /// Whether no terminal is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every terminal.
    pub fn shutdown(&self) {
        let all: Vec<_> = lock(&self.terminals).drain().map(|(_, aux)| aux).collect();
        for aux in all {
            aux.shutdown();
        }
    }
}
