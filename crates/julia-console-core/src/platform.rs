//! Platform selection for path-shaped text in terminal output.

use serde::{Deserialize, Serialize};

/// Path flavour used when scanning terminal output for links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Slash-separated paths (Linux, macOS, WSL)
    Posix,
    /// Drive letters, UNC prefixes, either separator
    Windows,
}

impl Platform {
    /// The platform this binary was compiled for.
    ///
    /// ```
    /// use julia_console_core::Platform;
    ///
    /// let platform = Platform::detect();
    /// assert_eq!(platform == Platform::Windows, cfg!(windows));
    /// ```
    pub fn detect() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::detect()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Posix => write!(f, "posix"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_matches_target() {
        let platform = Platform::detect();
        if cfg!(windows) {
            assert_eq!(platform, Platform::Windows);
        } else {
            assert_eq!(platform, Platform::Posix);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Platform::Posix.to_string(), "posix");
        assert_eq!(Platform::Windows.to_string(), "windows");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&Platform::Windows).unwrap();
        assert_eq!(json, "\"windows\"");
    }
}
