//! The terminal surface a console pane renders.
//!
//! [`TerminalSurface`] is the narrow interface the session layer drives:
//! attach a stream, write local messages, hand it key events, hook link
//! matchers onto rendered lines. [`HeadlessTerminal`] implements it on top of
//! the VT [`Grid`](crate::Grid) without any UI toolkit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

use julia_console_core::{
    CursorStyle, Dimensions, Key, KeyEvent, Position, Result, Subscription, TerminalId,
};

use crate::grid::Grid;
use crate::parser::Parser;
use crate::pty::PtyStream;

/// Receives the text of every rendered line that changed.
pub trait LinkMatcher: Send + Sync {
    /// `row` is the visible row index, `text` the full row with trailing
    /// blanks trimmed. An empty `text` means the row was cleared.
    fn line_changed(&self, row: u16, text: &str);
}

/// Decides whether a key event is consumed by the terminal.
pub trait KeyFilter: Send + Sync {
    /// `true` lets the terminal handle the event.
    fn allows(&self, event: &KeyEvent) -> bool;
}

/// Callback run when the user asks to start a process in a detached terminal.
pub type StartHandler = Arc<dyn Fn() + Send + Sync>;

/// What happened to a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Sent to the attached process
    Written,
    /// Left for the editor's own command dispatch
    Forwarded,
    /// Enter pressed with nothing attached; the start handler ran
    StartRequested,
    /// Nothing attached and nothing to do
    Ignored,
}

/// A terminal pane that can be attached to a process stream.
pub trait TerminalSurface: Send + Sync {
    /// Stable identity; survives detach and re-attach.
    fn id(&self) -> &TerminalId;

    /// Render output (process output or local messages).
    fn write(&self, data: &[u8]);

    /// Send input to the attached process.
    fn send_input(&self, data: &[u8]) -> Result<()>;

    /// Connect to a process stream, replacing any previous one.
    fn attach(&self, stream: Arc<dyn PtyStream>);

    /// Drop the process stream. The rendered content stays.
    fn detach(&self);

    /// Whether a stream is attached.
    fn is_attached(&self) -> bool;

    /// Move pending process output onto the screen.
    fn pump(&self) -> Result<usize>;

    /// Clear scrollback and screen, keeping the current line.
    fn clear(&self);

    /// Current width in columns.
    fn cols(&self) -> u16;

    /// Cursor position on the visible screen.
    fn cursor(&self) -> Position;

    /// Resize the screen and the attached stream.
    fn resize(&self, dimensions: Dimensions) -> Result<()>;

    /// Select the inclusive range between two screen positions.
    fn select(&self, from: Position, to: Position);

    /// Drop any selection.
    fn clear_selection(&self);

    /// Selected text, if anything non-empty is selected.
    fn copy_selection(&self) -> Option<String>;

    /// Feed every changed line to `matcher` until the subscription is dropped.
    fn register_link_matcher(&self, matcher: Arc<dyn LinkMatcher>) -> Subscription;

    /// Route a key event.
    fn handle_key(&self, event: &KeyEvent) -> KeyOutcome;

    /// Install or remove the key filter.
    fn set_key_filter(&self, filter: Option<Arc<dyn KeyFilter>>);

    /// Install or remove the start handler.
    fn set_start_handler(&self, handler: Option<StartHandler>);

    /// Show the pane.
    fn open(&self);

    /// Hide the pane. The terminal itself lives on.
    fn close(&self);

    /// Whether the pane is shown.
    fn is_open(&self) -> bool;
}

/// Construction options for [`HeadlessTerminal`].
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    /// Pane title
    pub title: String,
    /// Style class of the pane
    pub class: String,
    /// Initial size
    pub dimensions: Dimensions,
    /// Maximum scrollback lines
    pub scrollback: usize,
    /// Cursor shape
    pub cursor_style: CursorStyle,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            title: "Terminal".to_string(),
            class: "julia-terminal".to_string(),
            dimensions: Dimensions::default(),
            scrollback: 5000,
            cursor_style: CursorStyle::Block,
        }
    }
}

type MatcherList = Mutex<Vec<(u64, Arc<dyn LinkMatcher>)>>;

struct Inner {
    parser: Parser,
    stream: Option<Arc<dyn PtyStream>>,
    /// Row texts as last reported to link matchers
    scanned: Vec<String>,
    selection: Option<(Position, Position)>,
    key_filter: Option<Arc<dyn KeyFilter>>,
    start_handler: Option<StartHandler>,
    open: bool,
}

impl Inner {
    /// Rows whose text differs from what matchers last saw.
    fn changed_rows(&mut self) -> Vec<(u16, String)> {
        let lines = self.parser.grid().visible_lines();
        self.scanned.resize(lines.len(), String::new());
        let mut changed = Vec::new();
        for (row, line) in lines.into_iter().enumerate() {
            if self.scanned[row] != line {
                self.scanned[row] = line.clone();
                changed.push((row as u16, line));
            }
        }
        changed
    }
}

/// Terminal surface backed by an in-memory VT grid.
pub struct HeadlessTerminal {
    id: TerminalId,
    title: String,
    class: String,
    inner: Mutex<Inner>,
    matchers: Arc<MatcherList>,
    next_matcher: AtomicU64,
}

impl std::fmt::Debug for HeadlessTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessTerminal")
            .field("id", &self.id)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl HeadlessTerminal {
    /// Create a detached terminal.
    pub fn new(id: TerminalId, options: TerminalOptions) -> Self {
        let mut grid = Grid::new(options.dimensions, options.scrollback);
        grid.cursor_mut().style = options.cursor_style;
        Self {
            id,
            title: options.title,
            class: options.class,
            inner: Mutex::new(Inner {
                parser: Parser::new(grid),
                stream: None,
                scanned: Vec::new(),
                selection: None,
                key_filter: None,
                start_handler: None,
                open: false,
            }),
            matchers: Arc::new(Mutex::new(Vec::new())),
            next_matcher: AtomicU64::new(0),
        }
    }

    /// Pane title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Style class of the pane.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Scrollback and screen as plain text.
    pub fn contents(&self) -> String {
        self.inner().parser.grid().to_plain_text()
    }

    /// Text of one visible row.
    pub fn row_text(&self, row: u16) -> Option<String> {
        self.inner().parser.grid().row_text(row)
    }

    /// Cursor shape.
    pub fn cursor_style(&self) -> CursorStyle {
        self.inner().parser.grid().cursor().style
    }

    /// Number of registered link matchers.
    pub fn link_matcher_count(&self) -> usize {
        self.matchers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn matchers(&self) -> Vec<Arc<dyn LinkMatcher>> {
        self.matchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, m)| Arc::clone(m))
            .collect()
    }

    /// Report changed rows. Must be called with `inner` unlocked.
    fn notify(&self, changed: Vec<(u16, String)>) {
        if changed.is_empty() {
            return;
        }
        let matchers = self.matchers();
        for (row, text) in &changed {
            for matcher in &matchers {
                matcher.line_changed(*row, text);
            }
        }
    }

    fn render(&self, data: &[u8]) {
        let changed = {
            let mut inner = self.inner();
            inner.parser.process(data);
            inner.changed_rows()
        };
        self.notify(changed);
    }
}

impl TerminalSurface for HeadlessTerminal {
    fn id(&self) -> &TerminalId {
        &self.id
    }

    fn write(&self, data: &[u8]) {
        self.render(data);
    }

    fn send_input(&self, data: &[u8]) -> Result<()> {
        let stream = self.inner().stream.clone();
        match stream {
            Some(stream) => stream.write(data).map(|_| ()),
            None => {
                debug!("Dropping {} input bytes for detached {}", data.len(), self.id);
                Ok(())
            }
        }
    }

    fn attach(&self, stream: Arc<dyn PtyStream>) {
        info!("Attaching terminal {}", self.id);
        let dims = {
            let mut inner = self.inner();
            inner.stream = Some(Arc::clone(&stream));
            inner.parser.grid().dimensions()
        };
        if let Err(e) = stream.resize(dims) {
            warn!("Failed to size stream for {}: {}", self.id, e);
        }
    }

    fn detach(&self) {
        if self.inner().stream.take().is_some() {
            info!("Detached terminal {}", self.id);
        }
    }

    fn is_attached(&self) -> bool {
        self.inner().stream.is_some()
    }

    fn pump(&self) -> Result<usize> {
        let stream = self.inner().stream.clone();
        let Some(stream) = stream else {
            return Ok(0);
        };
        let data = stream.read()?;
        if !data.is_empty() {
            self.render(&data);
        }
        Ok(data.len())
    }

    fn clear(&self) {
        let changed = {
            let mut inner = self.inner();
            inner.parser.grid_mut().clear();
            inner.selection = None;
            inner.changed_rows()
        };
        self.notify(changed);
    }

    fn cols(&self) -> u16 {
        self.inner().parser.grid().dimensions().cols
    }

    fn cursor(&self) -> Position {
        self.inner().parser.grid().cursor().position
    }

    fn resize(&self, dimensions: Dimensions) -> Result<()> {
        let (stream, changed) = {
            let mut inner = self.inner();
            inner.parser.grid_mut().resize(dimensions);
            inner.selection = None;
            (inner.stream.clone(), inner.changed_rows())
        };
        self.notify(changed);
        match stream {
            Some(stream) => stream.resize(dimensions),
            None => Ok(()),
        }
    }

    fn select(&self, from: Position, to: Position) {
        let (from, to) = if (from.row, from.col) <= (to.row, to.col) {
            (from, to)
        } else {
            (to, from)
        };
        self.inner().selection = Some((from, to));
    }

    fn clear_selection(&self) {
        self.inner().selection = None;
    }

    fn copy_selection(&self) -> Option<String> {
        let inner = self.inner();
        let (from, to) = inner.selection?;
        let grid = inner.parser.grid();
        let cols = grid.dimensions().cols;

        let mut lines = Vec::new();
        for row in from.row..=to.row {
            let start = if row == from.row { from.col } else { 0 };
            let end = if row == to.row { to.col } else { cols.saturating_sub(1) };
            let line: String = (start..=end).filter_map(|col| grid.char_at(row, col)).collect();
            lines.push(line.trim_end().to_string());
        }

        let text = lines.join("\n");
        (!text.is_empty()).then_some(text)
    }

    fn register_link_matcher(&self, matcher: Arc<dyn LinkMatcher>) -> Subscription {
        let key = self.next_matcher.fetch_add(1, Ordering::Relaxed);
        self.matchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key, Arc::clone(&matcher)));

        // Lines already on screen are scanned right away
        let existing: Vec<(u16, String)> = self
            .inner()
            .scanned
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.is_empty())
            .map(|(row, text)| (row as u16, text.clone()))
            .collect();
        for (row, text) in existing {
            matcher.line_changed(row, &text);
        }

        let matchers: Weak<MatcherList> = Arc::downgrade(&self.matchers);
        Subscription::new(move || {
            if let Some(matchers) = matchers.upgrade() {
                matchers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|(k, _)| *k != key);
            }
        })
    }

    fn handle_key(&self, event: &KeyEvent) -> KeyOutcome {
        let (stream, filter, start) = {
            let inner = self.inner();
            (
                inner.stream.clone(),
                inner.key_filter.clone(),
                inner.start_handler.clone(),
            )
        };

        if let Some(filter) = filter {
            if !filter.allows(event) {
                return KeyOutcome::Forwarded;
            }
        }

        match stream {
            Some(stream) => match stream.write(&event.to_escape_sequence()) {
                Ok(_) => KeyOutcome::Written,
                Err(e) => {
                    warn!("Failed to send {} to {}: {}", event, self.id, e);
                    KeyOutcome::Ignored
                }
            },
            None if event.key == Key::Enter => match start {
                Some(start) => {
                    start();
                    KeyOutcome::StartRequested
                }
                None => KeyOutcome::Ignored,
            },
            None => KeyOutcome::Ignored,
        }
    }

    fn set_key_filter(&self, filter: Option<Arc<dyn KeyFilter>>) {
        self.inner().key_filter = filter;
    }

    fn set_start_handler(&self, handler: Option<StartHandler>) {
        self.inner().start_handler = handler;
    }

    fn open(&self) {
        self.inner().open = true;
    }

    fn close(&self) {
        self.inner().open = false;
    }

    fn is_open(&self) -> bool {
        self.inner().open
    }
}
