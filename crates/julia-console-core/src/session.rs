//! Session and terminal identity types.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

lazy_static! {
    static ref AUXILIARY_ID: Regex = Regex::new(r"^terminal-julia-\d+$").unwrap();
}

/// Identifier of a terminal surface.
///
/// The REPL terminal has a fixed id so that closing and reopening its pane
/// finds the same logical terminal. Auxiliary shells get generated ids of the
/// form `terminal-julia-<n>`, which is also how persisted panes are
/// recognised on restore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalId(String);

impl TerminalId {
    /// Fixed id of the REPL terminal.
    pub const REPL: &'static str = "julia-terminal";

    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The REPL terminal id.
    pub fn repl() -> Self {
        Self(Self::REPL.to_string())
    }

    /// Generate a fresh auxiliary terminal id.
    pub fn generate_auxiliary() -> Self {
        let n = Uuid::new_v4().as_u128() % 10_000_000;
        Self(format!("terminal-julia-{n}"))
    }

    /// Whether this id names an auxiliary shell terminal.
    pub fn is_auxiliary(&self) -> bool {
        AUXILIARY_ID.is_match(&self.0)
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TerminalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which allow-list governs a terminal's key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalClass {
    /// The REPL pane attached to the runtime
    Repl,
    /// Generic shell panes
    Terminal,
}

/// Lifecycle state of the runtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// Nothing started yet
    #[default]
    Idle,
    /// Boot requested, waiting for the process
    Starting,
    /// Process booted and terminal attached
    Attached,
    /// Process went away; terminal kept for the next boot
    Detached,
}

impl SessionState {
    /// Whether a user start request is meaningful in this state.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Detached)
    }

    /// Whether a process is currently attached.
    pub fn is_attached(&self) -> bool {
        matches!(self, SessionState::Attached)
    }
}
