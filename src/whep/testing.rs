//! Local fixtures shared by the signaling, event-stream and session tests

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use reqwest::Url;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::peer::build_api;
use crate::config::{MdnsMode, WhepConfig};

/// Serve `router` on an ephemeral loopback port
pub(crate) async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
}

/// Signaling config pointed at a test server
pub(crate) fn config_for(base: &Url) -> WhepConfig {
    WhepConfig {
        endpoint_base: base.as_str().trim_end_matches('/').to_string(),
        request_timeout_ms: 5_000,
        ice_gathering_timeout_ms: 2_000,
        mdns_mode: MdnsMode::Disabled,
        ..Default::default()
    }
}

/// Answer a browser-style offer with a real peer connection sending `tracks`
///
/// The peer is returned so the caller keeps it alive for the test.
pub(crate) async fn answer_offer(
    offer: String,
    tracks: Vec<Arc<TrackLocalStaticSample>>,
) -> (String, Arc<RTCPeerConnection>) {
    let api = build_api(MdnsMode::Disabled, "answerer").unwrap();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );

    for track in tracks {
        pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .unwrap();
    }

    pc.set_remote_description(RTCSessionDescription::offer(offer).unwrap())
        .await
        .unwrap();
    let answer = pc.create_answer(None).await.unwrap();
    let mut gathering = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), gathering.recv()).await;

    let sdp = pc.local_description().await.unwrap().sdp;
    (sdp, pc)
}
