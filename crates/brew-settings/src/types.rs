//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the kettle server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrewSettings {
    /// Network binding.
    pub server: ServerSettings,
    /// Per-connection limits and timers.
    pub connection: ConnectionSettings,
    /// Round coordination policy.
    pub kettle: KettleSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BrewSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.connection;
        for (name, value) in [
            ("pongWaitMs", c.pong_wait_ms),
            ("pingPeriodMs", c.ping_period_ms),
            ("writeWaitMs", c.write_wait_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} must be at least 1"
                )));
            }
        }
        if c.ping_period_ms >= c.pong_wait_ms {
            return Err(SettingsError::InvalidValue(format!(
                "pingPeriodMs ({}) must be below pongWaitMs ({})",
                c.ping_period_ms, c.pong_wait_ms
            )));
        }
        if c.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "mailboxCapacity must be at least 1".into(),
            ));
        }
        if c.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxMessageSize must be at least 1".into(),
            ));
        }
        if self.kettle.command_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "commandQueueCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Network binding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP/WebSocket port (`0` picks a free port).
    pub port: u16,
    /// Seconds to wait for in-flight tasks on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Limits applied to every drinker connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Largest inbound message accepted, in bytes. Bigger frames drop the connection.
    pub max_message_size: usize,
    /// Read inactivity deadline in milliseconds, refreshed by any inbound frame.
    pub pong_wait_ms: u64,
    /// Ping interval in milliseconds. Must be below `pong_wait_ms`.
    pub ping_period_ms: u64,
    /// Deadline for a single outbound write, in milliseconds.
    pub write_wait_ms: u64,
    /// Outbound mailbox capacity per drinker.
    pub mailbox_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            pong_wait_ms: 60_000,
            ping_period_ms: 54_000,
            write_wait_ms: 10_000,
            mailbox_capacity: 256,
        }
    }
}

impl ConnectionSettings {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}

/// Round coordination policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KettleSettings {
    /// How long an offer blocks competing offers, in seconds.
    pub offer_window_secs: u64,
    /// Capacity of each kettle's command queue.
    pub command_queue_capacity: usize,
    /// Radius around a kettle whose participants are notified of an offer.
    pub notify_radius_metres: u32,
}

impl Default for KettleSettings {
    fn default() -> Self {
        Self {
            offer_window_secs: 600,
            command_queue_capacity: 64,
            notify_radius_metres: 100,
        }
    }
}

impl KettleSettings {
    pub fn offer_window(&self) -> Duration {
        Duration::from_secs(self.offer_window_secs)
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter (`RUST_LOG` takes precedence).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
