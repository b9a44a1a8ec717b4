//! Host-facing types: connection direction, status, notifications

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side opened the connection a frame arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A peer dialed our listener
    Inbound,
    /// We dialed the configured remote peer
    Outbound,
}

/// Metadata attached to every incoming update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMeta {
    pub direction: Direction,
    pub origin: Option<String>,
    /// The update was one item of a catch-up snapshot
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub snapshot: bool,
}

/// Read-only view of the engine, computed on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub server_enabled: bool,
    pub client_enabled: bool,
    pub listen_port: u16,
    pub listening: bool,
    pub remote_host: String,
    pub remote_port: u16,
    pub auto_connect: bool,
    pub outbound_connected: bool,
    pub inbound_connection_count: usize,
    pub instance_id: String,
    pub last_error: Option<String>,
    /// Milliseconds since the epoch
    pub last_connected_at: Option<i64>,
}

/// Coarse connectivity label for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionLabel {
    Off,
    Connected,
    Waiting,
    Starting,
}

impl std::fmt::Display for ConnectionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionLabel::Off => "off",
            ConnectionLabel::Connected => "connected",
            ConnectionLabel::Waiting => "waiting for peer",
            ConnectionLabel::Starting => "starting",
        };
        f.write_str(s)
    }
}

impl SyncStatus {
    pub fn has_connection(&self) -> bool {
        self.outbound_connected || self.inbound_connection_count > 0
    }

    pub fn label(&self) -> ConnectionLabel {
        if !self.enabled {
            ConnectionLabel::Off
        } else if self.has_connection() {
            ConnectionLabel::Connected
        } else if (self.server_enabled && self.listening) || self.client_enabled {
            ConnectionLabel::Waiting
        } else {
            ConnectionLabel::Starting
        }
    }

    /// One-line description, e.g.
    /// `server: listening | client: off | inbound: 2 | auto-reconnect: on`
    pub fn summary(&self) -> String {
        let server = match (self.server_enabled, self.listening) {
            (false, _) => "off",
            (true, true) => "listening",
            (true, false) => "not listening",
        };
        let client = match (self.client_enabled, self.outbound_connected) {
            (false, _) => "off",
            (true, true) => "connected",
            (true, false) => "disconnected",
        };
        let mut parts = vec![
            format!("server: {server}"),
            format!("client: {client}"),
            format!("inbound: {}", self.inbound_connection_count),
            format!("auto-reconnect: {}", if self.auto_connect { "on" } else { "off" }),
        ];
        if let Some(err) = &self.last_error {
            parts.push(format!("error: {err}"));
        }
        parts.join(" | ")
    }
}

/// Notifications delivered to the host
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// One application update from a peer (standalone or a snapshot item)
    Incoming { update: Value, meta: IncomingMeta },
    /// Connectivity or settings changed
    Status(SyncStatus),
}

/// Synchronous host handler. Errors and panics are logged, never propagated.
pub type EventHandler = Box<dyn Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync>;
