//! Julia Console Library
//!
//! Activation, remote-push handlers, user commands and the runtime booter.
//! The binary driver is in main.rs.

pub mod app;
pub mod booter;
pub mod commands;
pub mod handlers;

// Re-export commonly used types
pub use app::{Console, ConsoleHost, BANNER};
pub use booter::ProcessBooter;
pub use commands::{Command, CommandOutcome, INTERRUPT_COMMAND};
pub use handlers::{LintLocation, LintMessage, LintSink, Workspace, CURSOR_RESET};
