//! Session event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::error::ErrorReport;

/// Session event enumeration
///
/// Serialized as `{"event": "session.state_changed", "data": {...}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// Session moved to a new lifecycle state
    #[serde(rename = "session.state_changed")]
    StateChanged {
        session_id: String,
        /// "idle", "offering", "awaiting_answer", "connected", "closed", "failed"
        state: String,
        /// Failure message when `state` is "failed"
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Link directory parsed from the offer response
    #[serde(rename = "session.links_discovered")]
    LinksDiscovered {
        session_id: String,
        layer_url: Option<String>,
        events_url: Option<String>,
        /// Required relations the server did not advertise
        missing: Vec<String>,
    },

    /// A `layers` event replaced the layer set
    #[serde(rename = "session.layers_updated")]
    LayersUpdated {
        session_id: String,
        encoding_ids: Vec<String>,
    },

    /// Remote track merged into the media stream
    #[serde(rename = "session.track_added")]
    TrackAdded {
        session_id: String,
        /// "audio" or "video"
        kind: String,
        track_id: String,
        stream_id: String,
    },

    /// Failure delivered to the error callback
    #[serde(rename = "session.error")]
    Error {
        session_id: String,
        report: ErrorReport,
    },
}

impl SessionEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "session.state_changed",
            Self::LinksDiscovered { .. } => "session.links_discovered",
            Self::LayersUpdated { .. } => "session.layers_updated",
            Self::TrackAdded { .. } => "session.track_added",
            Self::Error { .. } => "session.error",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            Self::StateChanged { session_id, .. }
            | Self::LinksDiscovered { session_id, .. }
            | Self::LayersUpdated { session_id, .. }
            | Self::TrackAdded { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `session.*` matches all session events
    /// - `session.state_changed` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_event_name() {
        let event = SessionEvent::LayersUpdated {
            session_id: "s1".to_string(),
            encoding_ids: vec!["high".to_string()],
        };
        assert_eq!(event.event_name(), "session.layers_updated");
        assert_eq!(event.session_id(), "s1");
    }

    #[test]
    fn test_matches_topic() {
        let event = SessionEvent::StateChanged {
            session_id: "s1".to_string(),
            state: "connected".to_string(),
            error: None,
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("session.*"));
        assert!(event.matches_topic("session.state_changed"));
        assert!(!event.matches_topic("player.*"));
        assert!(!event.matches_topic("session.error"));
    }

    #[test]
    fn test_serialization() {
        let event = SessionEvent::Error {
            session_id: "s1".to_string(),
            report: ErrorReport::new(ErrorKind::MalformedEvent, "invalid JSON"),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("session.error"));
        assert!(json.contains("malformed_event"));

        let deserialized: SessionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            deserialized,
            SessionEvent::Error { report, .. } if report.kind == ErrorKind::MalformedEvent
        ));
    }
}
