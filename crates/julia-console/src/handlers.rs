//! Handlers for messages the runtime pushes to the console.
//!
//! Each handler receives the positional arguments of the pushed frame and
//! returns the value sent back when the push was a call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use julia_console_core::Subscription;
use julia_console_session::RpcClient;
use julia_console_terminal::TerminalSurface;

/// Reset sequence written before the cursor is reported.
pub const CURSOR_RESET: &str = "\x1b[0m";

/// The editor's workspace view.
pub trait Workspace: Send + Sync {
    /// Refresh the variables shown for the runtime.
    fn update(&self);
}

/// Where a lint message points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintLocation {
    /// File the message is about
    pub file: String,
    /// `[[start_line, start_col], [end_line, end_col]]`, 0-based
    pub position: [[u32; 2]; 2],
}

/// One message reported by the runtime's static linter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintMessage {
    /// `error`, `warning` or `info`
    pub severity: String,
    /// Location in the source
    pub location: LintLocation,
    /// Short summary
    pub excerpt: String,
    /// Longer explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Receives lint results.
pub trait LintSink: Send + Sync {
    /// Replace every shown message.
    fn set_all_messages(&self, messages: Vec<LintMessage>);

    /// Remove every shown message.
    fn clear_messages(&self);
}

/// Register `updateWorkspace`, `clearconsole` and `cursorpos`.
pub fn register(
    client: &RpcClient,
    terminal: Arc<dyn TerminalSurface>,
    workspace: Arc<dyn Workspace>,
) -> Vec<Subscription> {
    let clear_target = Arc::clone(&terminal);
    vec![
        client.on_message("updateWorkspace", move |_| {
            debug!("Workspace refresh requested");
            workspace.update();
            Ok(Value::Null)
        }),
        client.on_message("clearconsole", move |_| {
            clear_target.clear();
            Ok(Value::Null)
        }),
        client.on_message("cursorpos", move |_| {
            terminal.write(CURSOR_RESET.as_bytes());
            let cursor = terminal.cursor();
            Ok(json!([cursor.col, cursor.row]))
        }),
    ]
}

/// Register `staticLint` and `clearLint`.
pub fn register_linter(client: &RpcClient, sink: Arc<dyn LintSink>) -> Vec<Subscription> {
    let clear_sink = Arc::clone(&sink);
    vec![
        client.on_message("staticLint", move |args| {
            let warnings = args.into_iter().next().unwrap_or_else(|| json!([]));
            let messages: Vec<LintMessage> = serde_json::from_value(warnings)?;
            info!("{} lint message(s)", messages.len());
            sink.set_all_messages(messages);
            Ok(Value::Null)
        }),
        client.on_message("clearLint", move |_| {
            clear_sink.clear_messages();
            Ok(Value::Null)
        }),
    ]
}
