// src/config.rs

//! Configuration for the producer side and the display process.
//!
//! Every struct can be deserialized from JSON and every field has a default,
//! so a config file only needs the settings it changes. The file is located
//! through the `JES_SHOW_CONFIG` environment variable; without it the defaults
//! apply.
//!
//! Components take the section they need by reference. `CONFIG` is only the
//! lazily loaded default used by the convenience API.

use crate::channel::DEFAULT_MAX_PAYLOAD_BYTES;
use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV_VAR: &str = "JES_SHOW_CONFIG";

/// Environment variable naming the display binary.
pub const DISPLAY_PROGRAM_ENV_VAR: &str = "JES_SHOW_DISPLAY";

/// File name of the display binary built by this crate.
pub const DISPLAY_BINARY_NAME: &str = "jes-show";

/// Lazily loaded default configuration.
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load().unwrap_or_else(|e| {
        warn!(target: "jes_show::config", "Config: {:#}. Using defaults.", e);
        Config::default()
    })
});

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// How the display process is launched.
    pub display: DisplayConfig,
    /// Channel limits.
    pub channel: ChannelConfig,
    /// Timeouts for the exit handshake.
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Loads the file named by `JES_SHOW_CONFIG`, or returns defaults when the
    /// variable is unset.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_json_file(Path::new(&path)),
            None => {
                debug!(target: "jes_show::config", "Config: {} not set, using defaults", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// --- Display Process Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Path to the display binary. Falls back to `JES_SHOW_DISPLAY`, then a
    /// `jes-show` next to the current executable, then `jes-show` on `PATH`.
    pub program: Option<PathBuf>,
    /// Extra arguments for the display binary (e.g. `["--backend", "headless"]`).
    pub args: Vec<String>,
    /// `RUST_LOG`-style filter for the display process. When unset the child
    /// inherits the producer's environment.
    pub log_filter: Option<String>,
}

impl DisplayConfig {
    pub fn resolve_program(&self) -> PathBuf {
        if let Some(program) = &self.program {
            return program.clone();
        }
        if let Some(program) = std::env::var_os(DISPLAY_PROGRAM_ENV_VAR) {
            return PathBuf::from(program);
        }
        if let Some(sibling) = sibling_binary() {
            return sibling;
        }
        PathBuf::from(DISPLAY_BINARY_NAME)
    }
}

/// A `jes-show` binary in the same directory as the running executable.
/// Test harnesses live one level deeper (`target/debug/deps`), so the parent
/// directory is checked as well.
fn sibling_binary() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let found = [Some(dir), dir.parent()]
        .into_iter()
        .flatten()
        .map(|d| d.join(DISPLAY_BINARY_NAME))
        .find(|candidate| candidate.is_file());
    found
}

// --- Channel Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest frame payload the display accepts, in bytes.
    pub max_payload_bytes: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

// --- Shutdown Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long `request_exit` waits for the display process to exit.
    pub exit_timeout_ms: u64,
    /// How long a frame write to the display process may block before the
    /// display is reported unresponsive.
    pub send_timeout_ms: u64,
    /// How long a display whose window was closed waits for the producer to
    /// answer its exit token.
    pub handshake_timeout_ms: u64,
    /// How long the display waits for its listener thread to finish.
    pub listener_join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            exit_timeout_ms: 2000,
            send_timeout_ms: 2000,
            handshake_timeout_ms: 1000,
            listener_join_timeout_ms: 1000,
        }
    }
}

impl ShutdownConfig {
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn listener_join_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_join_timeout_ms)
    }
}
