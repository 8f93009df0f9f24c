//! User-invocable console commands.

use std::fmt;
use std::str::FromStr;

use julia_console_core::{Error, TerminalId};

/// Dispatched when copy-or-interrupt finds nothing to copy.
pub const INTERRUPT_COMMAND: &str = "julia-client:interrupt-julia";

/// Console commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Show the REPL pane
    OpenConsole,
    /// Clear the REPL pane
    ClearConsole,
    /// Copy the selection, or interrupt the runtime if nothing is selected
    CopyOrInterrupt,
    /// Open an auxiliary shell terminal
    NewTerminal,
}

impl Command {
    /// Every command.
    pub const ALL: [Command; 4] = [
        Command::OpenConsole,
        Command::ClearConsole,
        Command::CopyOrInterrupt,
        Command::NewTerminal,
    ];

    /// Registered command name.
    pub fn name(self) -> &'static str {
        match self {
            Command::OpenConsole => "julia-client:open-console",
            Command::ClearConsole => "julia-client:clear-console",
            Command::CopyOrInterrupt => "julia-client:copy-or-interrupt",
            Command::NewTerminal => "julia-client:new-terminal",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Accepts the full name or the part after `julia-client:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let short = s.strip_prefix("julia-client:").unwrap_or(s);
        Command::ALL
            .into_iter()
            .find(|c| c.name().strip_prefix("julia-client:") == Some(short))
            .ok_or_else(|| Error::InvalidInput(format!("unknown command `{s}`")))
    }
}

/// What a command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The REPL pane is shown
    Opened,
    /// The REPL pane was cleared
    Cleared,
    /// The selection was copied
    Copied(String),
    /// Another command should be dispatched
    Dispatch(&'static str),
    /// An auxiliary terminal was opened
    Spawned(TerminalId),
    /// The user cancelled a prompt
    Cancelled,
}
