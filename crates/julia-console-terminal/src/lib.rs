//! # julia-console-terminal
//!
//! Terminal emulation for the Julia console.
//!
//! This crate provides:
//! - VTE parser for ANSI/VT escape sequences
//! - Terminal grid with scrollback
//! - PTY (pseudo-terminal) process handles behind the [`PtyStream`] seam
//! - The [`TerminalSurface`] trait and its headless implementation
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on julia-console-core
//! and is driven by julia-console-session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod grid;
pub mod parser;
pub mod pty;
pub mod surface;

// Re-export commonly used types
pub use grid::{Cursor, Grid};
pub use parser::Parser;
pub use pty::{MemoryPty, PtyHandle, PtyStream};
pub use surface::{
    HeadlessTerminal, KeyFilter, KeyOutcome, LinkMatcher, StartHandler, TerminalOptions,
    TerminalSurface,
};
