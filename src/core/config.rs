use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

fn default_server_name() -> String {
    "NONAME".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_prompt() -> String {
    ">".to_string()
}

fn default_stats() -> bool {
    true
}

/// Console configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Name shown at the start of the terminal title
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Interval of the readiness poll, the stats refresh and the back-off
    /// after an input failure, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Text of the prompt entry
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Whether to run the stats loop when the host supports it
    #[serde(default = "default_stats")]
    pub stats: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            poll_interval_ms: default_poll_interval_ms(),
            prompt: default_prompt(),
            stats: default_stats(),
        }
    }
}

impl ConsoleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse console configuration")
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }
}
