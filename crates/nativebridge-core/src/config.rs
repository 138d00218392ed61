//! Bridge configuration.
//!
//! Defaults, an optional TOML file and environment overrides, applied in
//! that order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default values.
pub mod defaults {
    /// Conventional extensions subdirectory, relative to the working directory.
    pub const EXTENSIONS_SUBDIR: &str = "extensions";
}

/// Environment variable names.
pub mod env_vars {
    use std::path::PathBuf;

    /// Extra search directories, in platform path-list syntax.
    pub const EXTENSION_PATH: &str = "NATIVEBRIDGE_EXTENSION_PATH";
    /// Default timeout for non-blocking calls, in milliseconds.
    pub const CALL_TIMEOUT_MS: &str = "NATIVEBRIDGE_CALL_TIMEOUT_MS";
    /// Emit JSON logs from the CLI.
    pub const LOG_JSON: &str = "NATIVEBRIDGE_LOG_JSON";

    pub fn extension_path() -> Vec<PathBuf> {
        std::env::var_os(EXTENSION_PATH)
            .map(|raw| {
                std::env::split_paths(&raw)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn call_timeout_ms() -> Option<u64> {
        std::env::var(CALL_TIMEOUT_MS)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

/// Settings shared by a registry and everything it loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ordered candidate directories searched for relative extension names.
    pub search_dirs: Vec<PathBuf>,
    /// Directories searched after `search_dirs`.
    pub extra_dirs: Vec<PathBuf>,
    /// Default timeout for `ExtensionExports::call_async`. `None` waits forever.
    pub call_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            search_dirs: vec![cwd.clone(), cwd.join(defaults::EXTENSIONS_SUBDIR)],
            extra_dirs: Vec::new(),
            call_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load from a TOML file, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text)
                .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(config.with_env_overrides())
    }

    /// Parse TOML text. Omitted keys keep their defaults.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Replace the search directories, builder style.
    pub fn with_search_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// All directories to search, in order.
    pub fn candidate_dirs(&self) -> impl Iterator<Item = &Path> {
        self.search_dirs
            .iter()
            .chain(self.extra_dirs.iter())
            .map(PathBuf::as_path)
    }

    fn with_env_overrides(mut self) -> Self {
        for dir in env_vars::extension_path() {
            if !self.extra_dirs.contains(&dir) {
                self.extra_dirs.push(dir);
            }
        }
        if let Some(ms) = env_vars::call_timeout_ms() {
            self.call_timeout_ms = Some(ms);
        }
        self
    }
}
