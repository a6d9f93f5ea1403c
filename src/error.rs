use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Event stream error: {0}")]
    EventStream(String),

    #[error("Malformed event [{event}]: {reason}")]
    MalformedEvent { event: String, reason: String },

    #[error("Layer endpoint was not advertised by the server")]
    LayerEndpointUnavailable,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error category handed to error callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Signaling failed: HTTP non-success, missing relation, bad answer
    NegotiationFailed,
    /// Event-stream transport gave up after retries
    EventStream,
    /// A server-sent event could not be decoded
    MalformedEvent,
    /// Local peer connection failure
    WebRtc,
    /// HTTP transport or local IO failure outside negotiation
    Transport,
    Config,
    State,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NegotiationFailed => write!(f, "negotiation_failed"),
            ErrorKind::EventStream => write!(f, "event_stream"),
            ErrorKind::MalformedEvent => write!(f, "malformed_event"),
            ErrorKind::WebRtc => write!(f, "webrtc"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::State => write!(f, "state"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NegotiationFailed(_) => ErrorKind::NegotiationFailed,
            AppError::EventStream(_) => ErrorKind::EventStream,
            AppError::MalformedEvent { .. } => ErrorKind::MalformedEvent,
            AppError::LayerEndpointUnavailable | AppError::InvalidState(_) => ErrorKind::State,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Config(_) => ErrorKind::Config,
            AppError::WebRtcError(_) => ErrorKind::WebRtc,
            AppError::Http(_) | AppError::Io(_) => ErrorKind::Transport,
            AppError::Serialization(_) => ErrorKind::MalformedEvent,
        }
    }

    pub(crate) fn malformed(event: &str, reason: impl Into<String>) -> Self {
        AppError::MalformedEvent {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

/// Error report delivered to the session error callback and event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl From<&AppError> for ErrorReport {
    fn from(err: &AppError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
