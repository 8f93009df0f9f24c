//! Session lifecycle controller.
//!
//! Drives the REPL terminal through `Idle -> Starting -> Attached ->
//! Detached` from the client's boot and detach events. Everything installed
//! on boot goes into the boot cycle's [`Disposables`] and is released on the
//! next detach, or before the next boot if no detach came in between.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use julia_console_core::{Disposables, Error, Platform, SessionState, Subscription};
use julia_console_terminal::TerminalSurface;

use crate::links::{LinkResolver, Opener, ResolverMatcher};
use crate::modules::{Debouncer, ModuleIndicator};
use crate::rpc::{OutputSink, ProcessHandle, RpcClient};
use crate::settings::SettingsStore;

/// Written when a start is requested.
pub const STARTING_MESSAGE: &str = "Starting Julia...\n\r";

/// Written when the process goes away.
pub const EXIT_MESSAGE: &str =
    "\n\r\x1b[1m\r\x1b[31mJulia has exited.\x1b[0m Press Enter to start a new session.\n\r";

/// Collaborators of a [`ConsoleSession`].
pub struct SessionParts {
    /// Connection to the runtime
    pub client: Arc<RpcClient>,
    /// The REPL terminal
    pub terminal: Arc<dyn TerminalSurface>,
    /// Console settings
    pub settings: Arc<SettingsStore>,
    /// Active-module indicator
    pub modules: Arc<ModuleIndicator>,
    /// Opens validated links
    pub opener: Arc<dyn Opener>,
    /// Path grammar for link candidates
    pub platform: Platform,
    /// Quiet period before a module change is forwarded
    pub module_debounce: Duration,
}

#[derive(Default)]
struct Cycle {
    disposables: Disposables,
    resolver: Option<Arc<LinkResolver>>,
}

/// Owns the REPL session state machine.
pub struct ConsoleSession {
    parts: SessionParts,
    state: Mutex<SessionState>,
    cycle: Mutex<Cycle>,
    subscriptions: Mutex<Disposables>,
}

impl std::fmt::Debug for ConsoleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSession")
            .field("state", &self.state())
            .field("terminal", self.parts.terminal.id())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConsoleSession {
    /// Create an idle session. Nothing is wired until [`ConsoleSession::activate`].
    pub fn new(parts: SessionParts) -> Arc<Self> {
        Arc::new(Self {
            parts,
            state: Mutex::new(SessionState::Idle),
            cycle: Mutex::new(Cycle::default()),
            subscriptions: Mutex::new(Disposables::new()),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), next);
        if previous != next {
            info!("Session state {:?} -> {:?}", previous, next);
        }
    }

    /// The REPL terminal.
    pub fn terminal(&self) -> &Arc<dyn TerminalSurface> {
        &self.parts.terminal
    }

    /// The runtime client.
    pub fn client(&self) -> &Arc<RpcClient> {
        &self.parts.client
    }

    /// The link resolver of the current boot cycle.
    pub fn resolver(&self) -> Option<Arc<LinkResolver>> {
        lock(&self.cycle).resolver.clone()
    }

    /// Handles held by the current boot cycle.
    pub fn cycle_len(&self) -> usize {
        lock(&self.cycle).disposables.len()
    }

    /// Subscribe to the client's lifecycle events and hook the terminal's
    /// start request.
    pub fn activate(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut subs = lock(&self.subscriptions);

        let boot = weak.clone();
        subs.add(self.parts.client.on_boot(move |process| {
            if let Some(session) = boot.upgrade() {
                session.handle_boot(process);
            }
        }));

        let detach = weak.clone();
        subs.add(self.parts.client.on_detached(move || {
            if let Some(session) = detach.upgrade() {
                session.handle_detached();
            }
        }));

        let start = weak;
        self.parts
            .terminal
            .set_start_handler(Some(Arc::new(move || {
                if let Some(session) = start.upgrade() {
                    session.start();
                }
            })));
        let terminal = Arc::clone(&self.parts.terminal);
        subs.add(Subscription::new(move || terminal.set_start_handler(None)));

        debug!("Console session activated");
    }

    /// Request a boot if nothing is running. Returns whether one was requested.
    pub fn start(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.can_start() {
                debug!("Start ignored in state {:?}", *state);
                return false;
            }
            *state = SessionState::Starting;
        }
        info!("Starting runtime");
        self.parts.terminal.write(STARTING_MESSAGE.as_bytes());

        if let Err(e) = self.parts.client.boot() {
            self.boot_failed(&e);
            return false;
        }
        true
    }

    /// Report a boot that never produced a connection. Only acts while
    /// starting.
    pub fn boot_failed(&self, e: &Error) {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Starting {
                debug!("Boot failure ignored in state {:?}", *state);
                return;
            }
            *state = SessionState::Detached;
        }
        error!("Boot failed: {}", e);
        self.parts
            .terminal
            .write(format!("\x1b[31mFailed to start Julia: {e}\x1b[0m\n\r").as_bytes());
    }

    fn handle_boot(&self, process: &Arc<ProcessHandle>) {
        // A boot without a detach in between replaces the live cycle
        if self.state() == SessionState::Attached {
            warn!("Boot while attached; tearing down the previous cycle");
            self.parts.terminal.detach();
            self.teardown_cycle();
        }

        let terminal = &self.parts.terminal;
        terminal.attach(process.stream());

        if let Some(flush) = process.take_flush() {
            debug!("Flushing buffered output");
            let write = |data: &str| terminal.write(data.as_bytes());
            flush(OutputSink {
                stdout: &write,
                stderr: &write,
            });
        }

        let mut cycle = Cycle::default();

        let client = Arc::clone(&self.parts.client);
        cycle.disposables.add(self.parts.settings.observe(
            |s| s.prompt.clone(),
            move |prompt: &String| {
                client.send_message("changeprompt", vec![json!(format!("{prompt} "))]);
            },
        ));

        let resolver = LinkResolver::new(
            Arc::clone(&self.parts.client),
            Arc::clone(&self.parts.opener),
            self.parts.platform,
        );
        cycle.disposables.add(
            terminal.register_link_matcher(Arc::new(ResolverMatcher(Arc::clone(&resolver)))),
        );
        let shutdown = Arc::clone(&resolver);
        cycle
            .disposables
            .add(Subscription::new(move || shutdown.shutdown()));
        cycle.resolver = Some(resolver);

        let debouncer = Arc::new(Debouncer::new(self.parts.module_debounce));
        let (client, modules, term) = (
            Arc::clone(&self.parts.client),
            Arc::clone(&self.parts.modules),
            Arc::clone(&self.parts.terminal),
        );
        let pending = Arc::clone(&debouncer);
        cycle.disposables.add(self.parts.modules.on_change(move |_| {
            let (client, modules, term) =
                (Arc::clone(&client), Arc::clone(&modules), Arc::clone(&term));
            pending.call(move || {
                let module = modules.current();
                let cols = term.cols();
                debug!("changemodule {} ({} cols)", module, cols);
                client.send_message("changemodule", vec![json!({ "mod": module, "cols": cols })]);
            });
        }));
        cycle
            .disposables
            .add(Subscription::new(move || debouncer.cancel()));

        let previous = std::mem::replace(&mut *lock(&self.cycle), cycle);
        drop(previous);
        self.set_state(SessionState::Attached);
    }

    fn handle_detached(&self) {
        if self.state() != SessionState::Attached {
            debug!("Detach ignored in state {:?}", self.state());
            return;
        }

        let terminal = &self.parts.terminal;
        terminal.detach();
        terminal.write(EXIT_MESSAGE.as_bytes());
        self.teardown_cycle();
        self.parts.client.reset_pending();
        self.set_state(SessionState::Detached);
    }

    fn teardown_cycle(&self) {
        let mut cycle = std::mem::take(&mut *lock(&self.cycle));
        debug!("Releasing {} cycle handle(s)", cycle.disposables.len());
        cycle.disposables.dispose();
    }

    /// Release every subscription and the current cycle.
    pub fn deactivate(&self) {
        self.teardown_cycle();
        lock(&self.subscriptions).dispose();
        info!("Console session deactivated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::OpenOptions;
    use crate::rpc::{Booter, Frame};
    use julia_console_core::{ConsoleSettings, Key, KeyEvent, Result, TerminalId};
    use julia_console_terminal::{HeadlessTerminal, KeyOutcome, MemoryPty, TerminalOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct NoOpener;

    impl Opener for NoOpener {
        fn open(&self, _path: &str, _line: u32, _options: OpenOptions) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingBooter {
        boots: AtomicUsize,
    }

    impl Booter for CountingBooter {
        fn boot(&self, _client: Arc<RpcClient>) -> Result<()> {
            self.boots.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        session: Arc<ConsoleSession>,
        terminal: Arc<HeadlessTerminal>,
        settings: Arc<SettingsStore>,
        modules: Arc<ModuleIndicator>,
        client: Arc<RpcClient>,
    }

    fn fixture() -> Fixture {
        let client = RpcClient::new();
        let terminal = Arc::new(HeadlessTerminal::new(
            TerminalId::repl(),
            TerminalOptions::default(),
        ));
        let settings = SettingsStore::new(ConsoleSettings::default());
        let modules = ModuleIndicator::new();
        let session = ConsoleSession::new(SessionParts {
            client: Arc::clone(&client),
            terminal: terminal.clone(),
            settings: Arc::clone(&settings),
            modules: Arc::clone(&modules),
            opener: Arc::new(NoOpener),
            platform: Platform::Posix,
            module_debounce: Duration::from_millis(200),
        });
        session.activate();
        Fixture {
            session,
            terminal,
            settings,
            modules,
            client,
        }
    }

    fn boot(client: &RpcClient) -> (Arc<MemoryPty>, mpsc::UnboundedReceiver<Frame>) {
        let pty = MemoryPty::new();
        let (tx, rx) = mpsc::unbounded_channel();
        client.connect(ProcessHandle::new(pty.clone()), tx);
        (pty, rx)
    }

    fn messages(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<(String, Vec<serde_json::Value>)> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Message { name, args } = frame {
                out.push((name, args));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_start_requests_boot_once() {
        let f = fixture();
        let booter = Arc::new(CountingBooter::default());
        f.client.set_booter(booter.clone());

        assert_eq!(
            f.terminal.handle_key(&KeyEvent::new(Key::Enter)),
            KeyOutcome::StartRequested
        );
        assert_eq!(f.session.state(), SessionState::Starting);
        assert!(f.terminal.contents().contains("Starting Julia..."));

        // A second Enter while starting does nothing
        f.terminal.handle_key(&KeyEvent::new(Key::Enter));
        assert_eq!(booter.boots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_boot_failure_returns_to_detached() {
        let f = fixture();
        assert!(!f.session.start());
        assert_eq!(f.session.state(), SessionState::Detached);
        assert!(f.terminal.contents().contains("Failed to start Julia"));
    }

    #[tokio::test]
    async fn test_late_boot_failure_is_ignored_once_attached() {
        let f = fixture();
        let (_pty, _rx) = boot(&f.client);
        f.session.boot_failed(&Error::Cancelled);
        assert_eq!(f.session.state(), SessionState::Attached);
        assert!(!f.terminal.contents().contains("Failed to start"));
    }

    #[tokio::test]
    async fn test_boot_attaches_and_sends_prompt() {
        let f = fixture();
        let (pty, mut rx) = boot(&f.client);

        assert_eq!(f.session.state(), SessionState::Attached);
        assert!(f.terminal.is_attached());
        assert!(f.session.resolver().is_some());
        assert_eq!(
            messages(&mut rx),
            vec![("changeprompt".to_string(), vec![json!("julia> ")])]
        );

        f.settings.modify(|s| s.prompt = "jl>".to_string());
        assert_eq!(
            messages(&mut rx),
            vec![("changeprompt".to_string(), vec![json!("jl> ")])]
        );

        pty.push_output(b"julia> ");
        f.terminal.pump().unwrap();
        assert_eq!(f.terminal.row_text(0).unwrap(), "julia>");
    }

    #[tokio::test]
    async fn test_flush_replays_buffered_output() {
        let f = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();
        let process = ProcessHandle::new(MemoryPty::new()).with_flush(Box::new(|sink: OutputSink<'_>| {
            (sink.stdout)("early out\r\n");
            (sink.stderr)("early err\r\n");
        }));
        f.client.connect(process, tx);
        let contents = f.terminal.contents();
        assert!(contents.contains("early out"));
        assert!(contents.contains("early err"));
    }

    #[tokio::test]
    async fn test_detach_tears_down_and_is_idempotent() {
        let f = fixture();
        let (_pty, _rx) = boot(&f.client);
        let resolver = f.session.resolver().unwrap();
        assert_eq!(f.settings.observer_count(), 1);
        assert_eq!(f.terminal.link_matcher_count(), 1);
        assert_eq!(f.modules.listener_count(), 1);

        f.client.disconnect();
        assert_eq!(f.session.state(), SessionState::Detached);
        assert!(!f.terminal.is_attached());
        assert!(!resolver.is_alive());
        assert_eq!(f.session.cycle_len(), 0);
        assert_eq!(f.settings.observer_count(), 0);
        assert_eq!(f.terminal.link_matcher_count(), 0);
        assert_eq!(f.modules.listener_count(), 0);
        assert!(f.terminal.contents().contains("Julia has exited."));

        // Directly re-running the detach path is a no-op
        f.session.handle_detached();
        f.client.disconnect();
        assert_eq!(f.terminal.contents().matches("Julia has exited.").count(), 1);
    }

    #[tokio::test]
    async fn test_boot_while_attached_replaces_cycle() {
        let f = fixture();
        let (_pty1, _rx1) = boot(&f.client);
        let first = f.session.resolver().unwrap();
        let (_pty2, _rx2) = boot(&f.client);

        assert!(!first.is_alive());
        assert!(f.session.resolver().unwrap().is_alive());
        assert_eq!(f.settings.observer_count(), 1);
        assert_eq!(f.terminal.link_matcher_count(), 1);
        assert_eq!(f.session.state(), SessionState::Attached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_module_changes_are_debounced() {
        let f = fixture();
        let (_pty, mut rx) = boot(&f.client);
        messages(&mut rx);

        for m in ["A", "B", "C"] {
            f.modules.set(m);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(messages(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(
            messages(&mut rx),
            vec![(
                "changemodule".to_string(),
                vec![json!({"mod": "C", "cols": 80})]
            )]
        );
    }

    #[tokio::test]
    async fn test_deactivate_releases_everything() {
        let f = fixture();
        let (_pty, _rx) = boot(&f.client);
        f.session.deactivate();
        assert_eq!(f.client.observer_count(), (0, 0));
        assert_eq!(f.settings.observer_count(), 0);
        assert_eq!(
            f.terminal.handle_key(&KeyEvent::new(Key::Enter)),
            KeyOutcome::Written
        );
    }
}
