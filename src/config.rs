// src/config.rs

//! Client configuration: the options object injected into the connection
//! core at construction time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Options governing a single connection's behavior. Immutable once the
/// connection core has been constructed from them.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientOptions {
    /// Whether the connection is expected to be re-established after a
    /// disconnect. This selects the delivery guarantee: with reconnect
    /// enabled, commands survive a disconnect and are replayed on
    /// activation (at-least-once); without it, writes against a dead
    /// transport fail immediately (at-most-once).
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// If true, a failure while replaying queued commands during
    /// activation cancels everything still queued before the failure is
    /// re-raised to the transport.
    #[serde(default)]
    pub cancel_commands_on_reconnect_failure: bool,

    /// Timeout for establishing the TCP connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            cancel_commands_on_reconnect_failure: false,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ClientOptions {
    /// Loads options from a TOML file. Missing fields fall back to their
    /// defaults.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let options: ClientOptions = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        Ok(options)
    }
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
