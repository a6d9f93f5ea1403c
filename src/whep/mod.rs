//! WHEP (WebRTC-HTTP egress) client
//!
//! Negotiates a receive-only WebRTC session with a WHEP endpoint:
//!
//! 1. Build a peer connection with recvonly audio and video transceivers
//! 2. POST the SDP offer to the endpoint with a bearer token
//! 3. Discover the layer and server-sent-events endpoints from `Link` headers
//! 4. Follow `layers` events while the SDP answer is applied
//!
//! # Architecture
//!
//! ```text
//! WhepSession ── start() ──> ReceivePeer (webrtc-rs)
//!      │                         │ on_track
//!      │                         v
//!      │                    MediaStream (watch)
//!      │
//!      ├── SignalingClient ── POST offer / POST layer / DELETE resource
//!      │
//!      └── EventStreamTask ── GET events ──> SseDecoder ──> LayerSet (watch)
//! ```

mod event_stream;
pub mod layers;
pub mod link;
pub mod media;
pub mod peer;
mod report;
pub mod retry;
pub mod session;
pub mod signaling;
pub mod sse;
pub mod state;

#[cfg(test)]
mod testing;

pub use layers::{parse_layers_event, LayerSelection, LayerSet};
pub use link::{LinkDirectory, LinkDiscovery, LinkEntry};
pub use media::{InboundTrack, MediaStream, TrackKind};
pub use peer::{PeerState, ReceivePeer};
pub use report::ErrorHandler;
pub use session::{RemoteMediaStream, WhepSession};
pub use signaling::{OfferResponse, SignalingClient};
pub use state::SessionState;
