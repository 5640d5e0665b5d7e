//! Configuration for the Harbor runtime.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HARBOR_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/harbor/config.toml
//!   3. ~/.config/harbor/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub threads: ThreadConfig,
    pub io: IoConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Reactor (I/O loop) threads. 0 = available parallelism.
    pub reactors: usize,
    /// Worker (callback) threads. 0 = default of 4.
    pub workers: usize,
    /// Per-worker event queue capacity.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Readiness events drained per poll cycle.
    pub event_batch: usize,
    /// Stack read buffer size per read call, bytes.
    pub read_buffer: usize,
    /// Poll timeout, milliseconds. Bounds shutdown latency.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Reassembly timeout for partially received messages, milliseconds.
    pub message_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: ThreadConfig::default(),
            io: IoConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            reactors: 0,
            workers: 0,
            queue_capacity: 8192,
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            event_batch: 64,
            read_buffer: 8192,
            poll_interval_ms: 100,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            message_timeout_ms: crate::wire::DEFAULT_MESSAGE_TIMEOUT_MS,
        }
    }
}

impl ThreadConfig {
    /// Reactor count with the 0 = auto rule applied.
    pub fn effective_reactors(&self) -> usize {
        if self.reactors > 0 {
            // The routing field in a connection id is 8 bits wide.
            return self.reactors.min(256);
        }
        std::thread::available_parallelism().map(usize::from).unwrap_or(1)
    }

    /// Worker count with the 0 = default rule applied.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            4
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("harbor")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RuntimeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RuntimeConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HARBOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RuntimeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HARBOR_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HARBOR_THREADS__REACTORS") {
            if let Ok(n) = v.parse() {
                self.threads.reactors = n;
            }
        }
        if let Ok(v) = std::env::var("HARBOR_THREADS__WORKERS") {
            if let Ok(n) = v.parse() {
                self.threads.workers = n;
            }
        }
        if let Ok(v) = std::env::var("HARBOR_THREADS__QUEUE_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.threads.queue_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("HARBOR_IO__READ_BUFFER") {
            if let Ok(n) = v.parse() {
                self.io.read_buffer = n;
            }
        }
        if let Ok(v) = std::env::var("HARBOR_IO__POLL_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.io.poll_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("HARBOR_PROTOCOL__MESSAGE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.protocol.message_timeout_ms = n;
            }
        }
    }
}
