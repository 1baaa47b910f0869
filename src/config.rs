//! Server configuration
//!
//! Static tunables applied at construction. Every field has a default so a
//! JSON file only needs to name the values it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CableError;

/// Configuration shared by the dispatcher, every room worker and every pump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of the dispatcher register queue and of each room's join queue
    pub register_buffer: usize,
    /// Capacity of broadcast queues and of each connection's outbound queue
    pub broadcast_buffer: usize,
    /// Deliver a sender's own messages back to it
    pub echo_to_sender: bool,
    /// Time allowed to read the next pong from the peer
    pub pong_wait_ms: u64,
    /// Time allowed to write a frame to the peer
    pub write_wait_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            register_buffer: 128,
            broadcast_buffer: 128,
            echo_to_sender: false,
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CableError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the channel and timer machinery cannot work with
    pub fn validate(&self) -> Result<(), CableError> {
        if self.register_buffer == 0 {
            return Err(CableError::Config("register_buffer must be positive".into()));
        }
        if self.broadcast_buffer == 0 {
            return Err(CableError::Config("broadcast_buffer must be positive".into()));
        }
        if self.pong_wait_ms < 10 {
            return Err(CableError::Config("pong_wait_ms must be at least 10".into()));
        }
        if self.write_wait_ms == 0 {
            return Err(CableError::Config("write_wait_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Ping period, 90% of the pong wait so a ping lands before the peer's deadline
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}
