//! Sync settings and their normalizer
//!
//! Settings arrive from the host as loosely-typed JSON (UI forms, YAML files,
//! CLI overrides). `normalize` turns any such value into a fully populated
//! [`SyncSettings`]; it never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default port for both the listener and the remote peer
pub const DEFAULT_PORT: u16 = 19625;

const MIN_PORT: i64 = 1024;
const MAX_PORT: i64 = 65535;

/// Effective sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub enabled: bool,
    pub server_enabled: bool,
    pub client_enabled: bool,
    pub listen_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub auto_connect: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            server_enabled: false,
            client_enabled: false,
            listen_port: DEFAULT_PORT,
            remote_host: String::new(),
            remote_port: DEFAULT_PORT,
            auto_connect: true,
        }
    }
}

impl SyncSettings {
    /// Sync is on and at least one role is enabled
    pub fn is_active(&self) -> bool {
        self.enabled && (self.server_enabled || self.client_enabled)
    }

    /// Whether the outbound connector should be dialing
    pub fn wants_outbound(&self) -> bool {
        self.client_enabled && self.auto_connect && !self.remote_host.is_empty()
    }

    /// `host:port` identity of the configured remote peer, empty when no host is set
    pub fn outbound_key(&self) -> String {
        if self.remote_host.is_empty() {
            return String::new();
        }
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    pub fn remote_url(&self) -> String {
        format!("ws://{}:{}", self.remote_host, self.remote_port)
    }
}

/// Normalize an arbitrary (possibly partial) settings object.
///
/// Role resolution: when either `serverEnabled` or `clientEnabled` is an
/// explicit boolean, `enabled` becomes their OR. Otherwise `enabled` drives
/// both roles, and a global disable forces both roles off.
pub fn normalize(input: &Value) -> SyncSettings {
    let empty = serde_json::Map::new();
    let base = input.as_object().unwrap_or(&empty);

    let explicit_server = base.get("serverEnabled").and_then(Value::as_bool);
    let explicit_client = base.get("clientEnabled").and_then(Value::as_bool);
    let mut enabled = base.get("enabled").and_then(Value::as_bool) == Some(true);
    let mut server_enabled = explicit_server.unwrap_or(enabled);
    let mut client_enabled = explicit_client.unwrap_or(enabled);

    if explicit_server.is_some() || explicit_client.is_some() {
        enabled = server_enabled || client_enabled;
    } else if !enabled {
        server_enabled = false;
        client_enabled = false;
    }

    SyncSettings {
        enabled,
        server_enabled,
        client_enabled,
        listen_port: normalize_port(base.get("listenPort"), DEFAULT_PORT),
        remote_host: base
            .get("remoteHost")
            .and_then(Value::as_str)
            .map(|h| h.trim().to_string())
            .unwrap_or_default(),
        remote_port: normalize_port(base.get("remotePort"), DEFAULT_PORT),
        auto_connect: base.get("autoConnect").and_then(Value::as_bool) != Some(false),
    }
}

fn normalize_port(input: Option<&Value>, fallback: u16) -> u16 {
    match input.and_then(parse_int) {
        Some(port) if (MIN_PORT..=MAX_PORT).contains(&port) => port as u16,
        _ => fallback,
    }
}

/// Integer-prefix parse: numbers truncate, strings use their leading decimal digits.
fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let (negative, digits) = match s.as_bytes().first() {
                Some(b'-') => (true, &s[1..]),
                Some(b'+') => (false, &s[1..]),
                _ => (false, s),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            let parsed: i64 = digits[..end].parse().ok()?;
            Some(if negative { -parsed } else { parsed })
        }
        _ => None,
    }
}
