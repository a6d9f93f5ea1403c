use serde::{Deserialize, Serialize};

use crate::playback::PlaybackOptions;

/// Link relation advertising the simulcast layer endpoint
pub const LAYER_RELATION: &str = "urn:ietf:params:whep:ext:core:layer";
/// Link relation advertising the server-sent-events endpoint
pub const EVENTS_RELATION: &str = "urn:ietf:params:whep:ext:core:server-sent-events";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WHEP signaling settings
    pub whep: WhepConfig,
    /// Event-stream reconnect policy
    pub event_stream: EventStreamConfig,
    /// Player options
    pub playback: PlaybackOptions,
}

/// WHEP signaling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhepConfig {
    /// Signaling base URL (scheme, host and port)
    pub endpoint_base: String,
    /// Path of the WHEP endpoint below the base URL
    pub endpoint_path: String,
    /// Bearer credential sent with every signaling request
    pub token: Option<String>,
    /// Relation type of the layer endpoint
    pub layer_relation: String,
    /// Relation type of the server-sent-events endpoint
    pub events_relation: String,
    /// Continue without layer discovery when a relation is missing
    pub allow_degraded: bool,
    /// Per-request timeout for signaling calls (ms)
    pub request_timeout_ms: u64,
    /// Upper bound on ICE gathering before the offer is sent (ms)
    pub ice_gathering_timeout_ms: u64,
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// mDNS candidate handling
    pub mdns_mode: MdnsMode,
}

impl Default for WhepConfig {
    fn default() -> Self {
        Self {
            endpoint_base: "http://localhost:8090".to_string(),
            endpoint_path: "/api/whep".to_string(),
            token: None,
            layer_relation: LAYER_RELATION.to_string(),
            events_relation: EVENTS_RELATION.to_string(),
            allow_degraded: true,
            request_timeout_ms: 10_000,
            ice_gathering_timeout_ms: 5_000,
            // Host candidates are enough for local servers
            stun_servers: vec![],
            turn_servers: vec![],
            mdns_mode: MdnsMode::QueryOnly,
        }
    }
}

impl WhepConfig {
    /// Full URL of the WHEP endpoint
    pub fn endpoint_url(&self) -> String {
        let base = self.endpoint_base.trim_end_matches('/');
        if self.endpoint_path.is_empty() {
            base.to_string()
        } else if self.endpoint_path.starts_with('/') {
            format!("{}{}", base, self.endpoint_path)
        } else {
            format!("{}/{}", base, self.endpoint_path)
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN URLs; several allow UDP/TCP fallback
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// mDNS mode for ICE host candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MdnsMode {
    Disabled,
    QueryOnly,
    QueryAndGather,
}

impl Default for MdnsMode {
    fn default() -> Self {
        Self::QueryOnly
    }
}

impl MdnsMode {
    /// Parse the `WHEP_VIEWER_MDNS_MODE` spelling
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "false" | "0" => Some(Self::Disabled),
            "query" | "query_only" | "query-only" => Some(Self::QueryOnly),
            "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
                Some(Self::QueryAndGather)
            }
            _ => None,
        }
    }

    /// Environment override, falling back to the configured mode
    pub fn from_env_or(self) -> Self {
        std::env::var("WHEP_VIEWER_MDNS_MODE")
            .ok()
            .and_then(|raw| Self::parse(&raw))
            .unwrap_or(self)
    }
}

/// Event-stream reconnect policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStreamConfig {
    /// First reconnect delay (ms); a server `retry:` field replaces it
    pub initial_delay_ms: u64,
    /// Reconnect delay cap (ms)
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 8,
        }
    }
}
