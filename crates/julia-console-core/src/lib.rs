//! # julia-console-core
//!
//! Core types for the Julia console.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other julia-console crates. It provides:
//!
//! - Configuration (console, boot and logging settings)
//! - Session state and terminal identifiers
//! - Keystroke normalization for allow-list lookups
//! - The link grammar that finds `<path>[:<line>]` candidates in output
//! - Subscription handles used by every observer registration
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other julia-console crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod key;
pub mod link;
pub mod platform;
pub mod session;
pub mod subscription;

// Re-export commonly used types
pub use config::{
    BootSettings, ConsoleConfig, ConsoleSettings, ConsoleStyle, CursorStyle, ServerSettings,
};
pub use error::{Error, Result};
pub use geometry::{Dimensions, Position};
pub use key::{Key, KeyEvent, Modifiers};
pub use link::{find_candidates, LinkMatch};
pub use platform::Platform;
pub use session::{SessionState, TerminalClass, TerminalId};
pub use subscription::{Disposables, Subscription};
