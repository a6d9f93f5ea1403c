//! Receive-only WebRTC peer connection

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use crate::config::{MdnsMode, WhepConfig};
use crate::error::{AppError, Result};

/// Peer connection state as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::New => write!(f, "new"),
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Disconnected => write!(f, "disconnected"),
            PeerState::Failed => write!(f, "failed"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}

impl From<MdnsMode> for MulticastDnsMode {
    fn from(mode: MdnsMode) -> Self {
        match mode {
            MdnsMode::Disabled => MulticastDnsMode::Disabled,
            MdnsMode::QueryOnly => MulticastDnsMode::QueryOnly,
            MdnsMode::QueryAndGather => MulticastDnsMode::QueryAndGather,
        }
    }
}

/// Build a WebRTC API with default codecs and interceptors
pub(crate) fn build_api(mdns: MdnsMode, session_id: &str) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    let mut setting_engine = SettingEngine::default();
    let mode = MulticastDnsMode::from(mdns);
    setting_engine.set_ice_multicast_dns_mode(mode);
    if mode == MulticastDnsMode::QueryAndGather {
        setting_engine.set_multicast_dns_host_name(format!("{session_id}.local"));
    }
    debug!("WebRTC mDNS mode: {:?} (session {})", mode, session_id);

    Ok(APIBuilder::new()
        .with_setting_engine(setting_engine)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn ice_servers(config: &WhepConfig) -> Vec<RTCIceServer> {
    let mut servers: Vec<RTCIceServer> = config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    servers.extend(config.turn_servers.iter().map(|turn| RTCIceServer {
        urls: turn.urls.clone(),
        username: turn.username.clone(),
        credential: turn.credential.clone(),
        ..Default::default()
    }));

    servers
}

/// Peer connection with one recvonly audio and one recvonly video transceiver
pub struct ReceivePeer {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    state_rx: watch::Receiver<PeerState>,
}

impl ReceivePeer {
    /// Create the peer connection
    ///
    /// Remote tracks are forwarded to `track_tx` as they arrive.
    pub async fn new(
        config: &WhepConfig,
        session_id: &str,
        track_tx: mpsc::UnboundedSender<Arc<TrackRemote>>,
    ) -> Result<Self> {
        let api = build_api(config.mdns_mode.from_env_or(), session_id)?;

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let (state_tx, state_rx) = watch::channel(PeerState::New);
        let state_tx = Arc::new(state_tx);
        let id = session_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            let id = id.clone();

            Box::pin(async move {
                let new_state = match s {
                    RTCPeerConnectionState::New => PeerState::New,
                    RTCPeerConnectionState::Connecting => PeerState::Connecting,
                    RTCPeerConnectionState::Connected => PeerState::Connected,
                    RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                    RTCPeerConnectionState::Failed => PeerState::Failed,
                    RTCPeerConnectionState::Closed => PeerState::Closed,
                    _ => return,
                };

                info!("Peer {} connection state: {}", id, new_state);
                let _ = state_tx.send(new_state);
            })
        }));

        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            debug!(
                "Remote {} track {} (stream {}, codec {})",
                track.kind(),
                track.id(),
                track.stream_id(),
                track.codec().capability.mime_type
            );
            let _ = track_tx.send(track);
            Box::pin(async {})
        }));

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to add {} transceiver: {}", kind, e))
            })?;
        }

        Ok(Self {
            session_id: session_id.to_string(),
            pc,
            state_rx,
        })
    }

    /// Create the offer and wait for ICE gathering
    ///
    /// Gathering is bounded by `gather_timeout`; on expiry the offer carries
    /// whatever candidates were found so far.
    pub async fn create_offer(&self, gather_timeout: Duration) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

        let mut gathering = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(gather_timeout, gathering.recv()).await.is_err() {
            warn!(
                "ICE gathering for session {} did not finish within {:?}",
                self.session_id, gather_timeout
            );
        }

        let local = self.pc.local_description().await.ok_or_else(|| {
            AppError::WebRtcError("Local description missing after gathering".to_string())
        })?;
        Ok(local.sdp)
    }

    /// Apply the remote SDP answer
    pub async fn apply_answer(&self, sdp: String) -> Result<()> {
        debug!("Remote answer SDP:\n{}", sdp);

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| AppError::NegotiationFailed(format!("Invalid SDP answer: {}", e)))?;

        self.pc.set_remote_description(answer).await.map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to set remote description: {}", e))
        })
    }

    pub fn state(&self) -> PeerState {
        *self.state_rx.borrow()
    }

    /// Subscribe to peer connection state changes
    pub fn state_watch(&self) -> watch::Receiver<PeerState> {
        self.state_rx.clone()
    }

    pub async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}
