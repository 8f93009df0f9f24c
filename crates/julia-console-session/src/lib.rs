//! # julia-console-session
//!
//! Session layer of the Julia console.
//!
//! This crate provides:
//! - The RPC client facade and its JSON-lines transport
//! - The session lifecycle controller (boot, attach, detach)
//! - Link resolution against the remote process
//! - Keybinding allow-lists and the key gate
//! - Auxiliary shell terminals
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture. It depends on julia-console-core
//! and julia-console-terminal.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auxiliary;
pub mod keybinding;
pub mod lifecycle;
pub mod links;
pub mod modules;
pub mod rpc;
pub mod settings;
pub mod transport;

// Re-export commonly used types
pub use auxiliary::{
    expand_home, select_directory, AuxiliaryTerminal, AuxiliaryTerminals, DirectoryPicker,
    NativePtySpawner, PersistedTerminal, PtySpawner,
};
pub use keybinding::{gate, AllowList, KeybindingAllowLists, KeybindingGate, Verdict};
pub use lifecycle::{ConsoleSession, SessionParts, EXIT_MESSAGE, STARTING_MESSAGE};
pub use links::{LinkResolver, OpenOptions, Opener, ResolverMatcher};
pub use modules::{Debouncer, ModuleIndicator};
pub use rpc::{Booter, FlushFn, Frame, Handler, OutputSink, ProcessHandle, RpcClient};
pub use settings::SettingsStore;
