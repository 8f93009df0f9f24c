//! Configuration types for the Julia console.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Console configuration loaded from a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Console settings
    pub console: ConsoleSettings,
    /// How the runtime process is booted
    pub boot: BootSettings,
    /// Process-level settings
    pub server: ServerSettings,
}

impl ConsoleConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ConsoleConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.console.scrollback == 0 {
            return Err(Error::Config("console.scrollback must be > 0".to_string()));
        }

        if self.console.shell.trim().is_empty() {
            return Err(Error::Config("console.shell cannot be empty".to_string()));
        }

        if self.boot.command.trim().is_empty() {
            return Err(Error::Config("boot.command cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Which console front end is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleStyle {
    /// Terminal-backed REPL driven over RPC
    #[default]
    ReplBased,
    /// Older console; this crate stays inactive
    Legacy,
}

/// Cursor shape of the embedded terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CursorStyle {
    /// Block cursor
    #[default]
    Block,
    /// Underline cursor
    Underline,
    /// Vertical bar cursor
    Bar,
}

/// Console settings, observed live by the session layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    /// Console front end selector
    pub style: ConsoleStyle,
    /// Scrollback size in lines
    pub scrollback: usize,
    /// Cursor shape
    pub cursor_style: CursorStyle,
    /// Prompt string sent to the runtime (a trailing space is appended)
    pub prompt: String,
    /// Shell used for auxiliary terminals
    pub shell: String,
    /// Keystrokes the REPL terminal hands back to the editor
    pub whitelisted_keybindings_repl: Vec<String>,
    /// Keystrokes auxiliary terminals hand back to the editor
    pub whitelisted_keybindings_terminal: Vec<String>,
    /// Quiet period for module indicator updates
    pub module_debounce_ms: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            style: ConsoleStyle::ReplBased,
            scrollback: 5000,
            cursor_style: CursorStyle::Block,
            prompt: "julia>".to_string(),
            shell: default_shell(),
            whitelisted_keybindings_repl: vec![
                "Ctrl-C".to_string(),
                "Ctrl-V".to_string(),
                "Ctrl-Shift-P".to_string(),
            ],
            whitelisted_keybindings_terminal: vec![
                "Ctrl-Shift-C".to_string(),
                "Ctrl-Shift-V".to_string(),
            ],
            module_debounce_ms: 200,
        }
    }
}

fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

/// Runtime boot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootSettings {
    /// Runtime executable
    pub command: String,
    /// Arguments; `{port}` is replaced with the RPC port
    pub args: Vec<String>,
    /// How long to wait for the runtime to connect back
    pub connect_timeout_ms: u64,
}

impl Default for BootSettings {
    fn default() -> Self {
        Self {
            command: "julia".to_string(),
            args: vec![
                "-i".to_string(),
                "-e".to_string(),
                "using Atom; Atom.connect({port})".to_string(),
            ],
            connect_timeout_ms: 30_000,
        }
    }
}

impl BootSettings {
    /// Arguments with the port placeholder substituted.
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{port}", &port.to_string()))
            .collect()
    }
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
