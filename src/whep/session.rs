//! WHEP session negotiator
//!
//! A `WhepSession` owns one receive-only peer connection. `start()` runs the
//! strict offer chain (create offer, POST, read answer, apply answer) while
//! the layer event stream runs beside it. All work is bound to one
//! cancellation token; `stop()` fires it and releases the peer, the event
//! stream and the server-side session resource exactly once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;

use super::event_stream::EventStreamTask;
use super::layers::{LayerSelection, LayerSet};
use super::link::LinkDiscovery;
use super::media::{InboundTrack, MediaStream};
use super::peer::{PeerState, ReceivePeer};
use super::report::Reporter;
use super::signaling::SignalingClient;
use super::state::SessionState;
use crate::config::AppConfig;
use crate::error::{AppError, ErrorReport, Result};
use crate::events::{EventBus, SessionEvent};

/// Inbound media of a session
pub type RemoteMediaStream = MediaStream<TrackRemote>;

/// How long `stop()` waits for background tasks to wind down
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state shared with background tasks
#[derive(Clone)]
struct Lifecycle {
    state: Arc<watch::Sender<SessionState>>,
    reporter: Reporter,
}

impl Lifecycle {
    /// Apply a transition if the state machine allows it
    fn advance(&self, next: SessionState) -> bool {
        let mut previous = None;
        let changed = self.state.send_if_modified(|state| {
            if state.can_transition_to(&next) {
                previous = Some(std::mem::replace(state, next.clone()));
                true
            } else {
                false
            }
        });

        if let Some(previous) = previous {
            info!(
                "Session {} state: {} -> {}",
                self.reporter.session_id(),
                previous.name(),
                next.name()
            );
            self.reporter.publish(SessionEvent::StateChanged {
                session_id: self.reporter.session_id().to_string(),
                state: next.name().to_string(),
                error: match &next {
                    SessionState::Failed { message, .. } => Some(message.clone()),
                    _ => None,
                },
            });
        }
        changed
    }

    fn fail(&self, err: &AppError) -> bool {
        self.advance(SessionState::Failed {
            kind: err.kind(),
            message: err.to_string(),
        })
    }

    fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

struct Inner {
    id: String,
    config: AppConfig,
    signaling: SignalingClient,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    layers: Arc<watch::Sender<LayerSet>>,
    media: Arc<watch::Sender<RemoteMediaStream>>,
    peer: Mutex<Option<Arc<ReceivePeer>>>,
    links: RwLock<Option<LinkDiscovery>>,
    resource: Mutex<Option<Url>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn reporter(&self) -> &Reporter {
        &self.lifecycle.reporter
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(future));
    }

    /// Close the peer, delete the server resource and join background tasks
    ///
    /// Each resource is taken out of its slot first, so repeated calls are
    /// no-ops.
    async fn release(&self) {
        let peer = self.peer.lock().take();
        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                warn!("Session {}: {}", self.id, e);
            }
        }

        let resource = self.resource.lock().take();
        if let Some(resource) = resource {
            if let Err(e) = self.signaling.delete_session(&resource).await {
                debug!("Session {}: failed to delete {}: {}", self.id, resource, e);
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("Session {}: background task did not stop in time", self.id);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(peer) = self.peer.get_mut().take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let id = self.id.clone();
                runtime.spawn(async move {
                    if let Err(e) = peer.close().await {
                        warn!("Session {}: {}", id, e);
                    }
                });
            }
        }
    }
}

/// Handle to one WHEP playback session
///
/// Cheap to clone; dropping the last handle cancels outstanding work.
#[derive(Clone)]
pub struct WhepSession {
    inner: Arc<Inner>,
}

impl WhepSession {
    /// Create an idle session
    pub fn new(config: AppConfig, events: Option<Arc<EventBus>>) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let signaling = SignalingClient::new(&config.whep)?;
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (layers_tx, _) = watch::channel(LayerSet::default());
        let (media_tx, _) = watch::channel(RemoteMediaStream::default());

        debug!("Created session {} for {}", id, signaling.endpoint());

        Ok(Self {
            inner: Arc::new(Inner {
                lifecycle: Lifecycle {
                    state: Arc::new(state_tx),
                    reporter: Reporter::new(id.clone(), events),
                },
                id,
                config,
                signaling,
                cancel: CancellationToken::new(),
                layers: Arc::new(layers_tx),
                media: Arc::new(media_tx),
                peer: Mutex::new(None),
                links: RwLock::new(None),
                resource: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Install the callback that receives every reported failure
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(ErrorReport) + Send + Sync + 'static,
    {
        self.inner.reporter().set_handler(Arc::new(handler));
    }

    /// Negotiate the session
    ///
    /// Returns once the remote answer is applied. Fatal failures move the
    /// session to `Failed`, are reported and are returned here. A concurrent
    /// `stop()` makes this return `Cancelled` with the session `Closed`.
    pub async fn start(&self) -> Result<()> {
        let lifecycle = &self.inner.lifecycle;
        if !lifecycle.advance(SessionState::Offering) {
            return Err(AppError::InvalidState(format!(
                "Cannot start a session in state {}",
                lifecycle.current().name()
            )));
        }

        let cancel = self.inner.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            result = self.negotiate() => result,
        };

        match result {
            Ok(()) => Ok(()),
            Err(AppError::Cancelled) => {
                debug!("Session {} negotiation cancelled", self.inner.id);
                self.inner.release().await;
                Err(AppError::Cancelled)
            }
            Err(e) => {
                self.inner.reporter().report(&e);
                lifecycle.fail(&e);
                self.inner.cancel.cancel();
                self.inner.release().await;
                Err(e)
            }
        }
    }

    async fn negotiate(&self) -> Result<()> {
        let inner = &self.inner;
        let whep = &inner.config.whep;

        let (track_tx, track_rx) = mpsc::unbounded_channel();
        let peer = Arc::new(ReceivePeer::new(whep, &inner.id, track_tx).await?);
        *inner.peer.lock() = Some(peer.clone());

        inner.spawn(pump_tracks(
            track_rx,
            inner.media.clone(),
            inner.reporter().clone(),
            inner.cancel.clone(),
        ));
        inner.spawn(watch_peer(
            peer.state_watch(),
            inner.lifecycle.clone(),
            inner.cancel.clone(),
        ));

        let offer = peer
            .create_offer(Duration::from_millis(whep.ice_gathering_timeout_ms))
            .await?;

        if !inner.lifecycle.advance(SessionState::AwaitingAnswer) {
            return Err(AppError::Cancelled);
        }
        let response = inner.signaling.post_offer(&offer).await?;
        *inner.resource.lock() = response.location.clone();

        let discovery = response
            .links
            .discover(&whep.layer_relation, &whep.events_relation);
        inner.reporter().publish(SessionEvent::LinksDiscovered {
            session_id: inner.id.clone(),
            layer_url: discovery.layer_url().map(|u| u.to_string()),
            events_url: discovery.events_url().map(|u| u.to_string()),
            missing: match &discovery {
                LinkDiscovery::Complete { .. } => vec![],
                LinkDiscovery::Degraded { missing, .. } => missing.clone(),
            },
        });

        if let LinkDiscovery::Degraded { missing, .. } = &discovery {
            if !whep.allow_degraded {
                return Err(AppError::NegotiationFailed(format!(
                    "Server did not advertise {}",
                    missing.join(", ")
                )));
            }
            warn!(
                "Session {} continuing without {}",
                inner.id,
                missing.join(", ")
            );
        }

        if let Some(events_url) = discovery.events_url() {
            let task = EventStreamTask {
                signaling: inner.signaling.clone(),
                url: events_url.clone(),
                config: inner.config.event_stream.clone(),
                layers: inner.layers.clone(),
                reporter: inner.reporter().clone(),
                cancel: inner.cancel.clone(),
            };
            inner.tasks.lock().push(task.spawn());
        }
        *inner.links.write() = Some(discovery);

        peer.apply_answer(response.answer).await?;

        if !inner.lifecycle.advance(SessionState::Connected) {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    /// Close the session
    ///
    /// Idempotent and safe before or during `start()`.
    pub async fn stop(&self) {
        self.inner.lifecycle.advance(SessionState::Closed);
        self.inner.cancel.cancel();
        self.inner.release().await;
    }

    /// Ask the server to forward the layer `encoding_id`
    pub async fn select_layer(&self, encoding_id: &str) -> Result<()> {
        let result = match self.layer_endpoint() {
            Some(url) => {
                self.inner
                    .signaling
                    .select_layer(&url, &LayerSelection::new(encoding_id))
                    .await
            }
            None => Err(AppError::LayerEndpointUnavailable),
        };

        if let Err(e) = &result {
            self.inner.reporter().report(e);
        }
        result
    }

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.current()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.inner.lifecycle.state.subscribe()
    }

    /// Most recent layer set (empty until the first `layers` event)
    pub fn layers(&self) -> LayerSet {
        self.inner.layers.borrow().clone()
    }

    pub fn layers_watch(&self) -> watch::Receiver<LayerSet> {
        self.inner.layers.subscribe()
    }

    pub fn media_stream(&self) -> RemoteMediaStream {
        self.inner.media.borrow().clone()
    }

    pub fn media_watch(&self) -> watch::Receiver<RemoteMediaStream> {
        self.inner.media.subscribe()
    }

    /// Link discovery outcome, once the offer response arrived
    pub fn links(&self) -> Option<LinkDiscovery> {
        self.inner.links.read().clone()
    }

    pub fn layer_endpoint(&self) -> Option<Url> {
        self.links().and_then(|links| links.layer_url().cloned())
    }

    pub fn events_endpoint(&self) -> Option<Url> {
        self.links().and_then(|links| links.events_url().cloned())
    }
}

/// Merge tracks from the peer into the shared media stream
async fn pump_tracks(
    mut tracks: mpsc::UnboundedReceiver<Arc<TrackRemote>>,
    media: Arc<watch::Sender<RemoteMediaStream>>,
    reporter: Reporter,
    cancel: CancellationToken,
) {
    loop {
        let track = tokio::select! {
            _ = cancel.cancelled() => break,
            track = tracks.recv() => match track {
                Some(track) => track,
                None => break,
            },
        };

        let Some(kind) = InboundTrack::kind(track.as_ref()) else {
            debug!("Ignoring track {} of unknown kind", TrackRemote::id(&track));
            continue;
        };
        let track_id = InboundTrack::id(track.as_ref());
        let stream_id = InboundTrack::stream_id(track.as_ref());

        let mut replaced = None;
        media.send_modify(|stream| {
            if let Ok(previous) = stream.merge(track) {
                replaced = previous;
            }
        });
        if let Some(previous) = replaced {
            debug!(
                "Track {} replaces {} track {}",
                track_id,
                kind,
                InboundTrack::id(previous.as_ref())
            );
        }

        info!("Session {}: {} track {} added", reporter.session_id(), kind, track_id);
        reporter.publish(SessionEvent::TrackAdded {
            session_id: reporter.session_id().to_string(),
            kind: kind.to_string(),
            track_id,
            stream_id,
        });
    }
}

/// Fail the session when ICE gives up
async fn watch_peer(
    mut peer_state: watch::Receiver<PeerState>,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = peer_state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        if *peer_state.borrow_and_update() == PeerState::Failed {
            let err = AppError::WebRtcError("Peer connection failed".to_string());
            if lifecycle.fail(&err) {
                lifecycle.reporter.report(&err);
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::sse::{Event, Sse};
    use axum::response::{AppendHeaders, IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use bytes::Bytes;
    use tokio::sync::broadcast;
    use webrtc::api::media_engine::MIME_TYPE_VP8;
    use webrtc::media::Sample;
    use webrtc::peer_connection::RTCPeerConnection;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    use super::*;
    use crate::config::{EVENTS_RELATION, LAYER_RELATION};
    use crate::error::ErrorKind;
    use crate::whep::testing::{answer_offer, config_for, serve};

    #[derive(Default)]
    struct Server {
        advertise_events: bool,
        answer_delay: Option<Duration>,
        video: Option<Arc<TrackLocalStaticSample>>,
        peers: Mutex<Vec<Arc<RTCPeerConnection>>>,
        selections: Mutex<Vec<LayerSelection>>,
        deleted: AtomicBool,
    }

    async fn whep(State(server): State<Arc<Server>>, headers: HeaderMap, offer: String) -> Response {
        if let Some(delay) = server.answer_delay {
            tokio::time::sleep(delay).await;
        }
        let host = headers
            .get("host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let (answer, pc) = answer_offer(offer, server.video.iter().cloned().collect()).await;
        server.peers.lock().push(pc);

        let mut links = vec![(
            "link",
            format!("<{}/api/layer/s1>; rel=\"{}\"", host, LAYER_RELATION),
        )];
        if server.advertise_events {
            links.push((
                "link",
                format!(
                    "<{}/api/sse/s1>; rel=\"{}\"; events=\"layers\"",
                    host, EVENTS_RELATION
                ),
            ));
        }
        links.push(("location", "/api/whep/s1".to_string()));

        (StatusCode::CREATED, AppendHeaders(links), answer).into_response()
    }

    async fn sse() -> impl IntoResponse {
        let events = vec![
            r#"{"1":{"layers":[{"encodingId":"a"},{"encodingId":"b"}]}}"#,
            r#"{"1":{"layers":[{"encodingId":"high"},{"encodingId":"low"}]}}"#,
        ];
        Sse::new(futures::stream::iter(events.into_iter().map(|data| {
            Ok::<_, std::convert::Infallible>(Event::default().event("layers").data(data))
        })))
    }

    async fn layer(State(server): State<Arc<Server>>, Json(selection): Json<LayerSelection>) -> StatusCode {
        server.selections.lock().push(selection);
        StatusCode::NO_CONTENT
    }

    async fn remove(State(server): State<Arc<Server>>) -> StatusCode {
        server.deleted.store(true, Ordering::SeqCst);
        StatusCode::OK
    }

    async fn start_server(server: Server) -> (Url, Arc<Server>) {
        let server = Arc::new(server);
        let router = Router::new()
            .route("/api/whep", post(whep))
            .route("/api/whep/s1", axum::routing::delete(remove))
            .route("/api/sse/s1", get(sse))
            .route("/api/layer/s1", post(layer))
            .with_state(server.clone());
        (serve(router).await, server)
    }

    fn app_config(base: &Url) -> AppConfig {
        let mut config = AppConfig::default();
        config.whep = config_for(base);
        config.whep.token = Some("abc123".to_string());
        config.event_stream.initial_delay_ms = 60_000;
        config.event_stream.max_delay_ms = 60_000;
        config
    }

    fn collect_reports(session: &WhepSession) -> Arc<Mutex<Vec<ErrorReport>>> {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        session.set_error_handler(move |report| sink.lock().push(report));
        reports
    }

    #[tokio::test]
    async fn test_negotiation_connects_and_tracks_layers() {
        let (base, server) = start_server(Server {
            advertise_events: true,
            ..Default::default()
        })
        .await;
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe();
        let session = WhepSession::new(app_config(&base), Some(bus)).unwrap();
        let reports = collect_reports(&session);

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(
            session.layer_endpoint().unwrap(),
            base.join("/api/layer/s1").unwrap()
        );

        let mut layers = session.layers_watch();
        tokio::time::timeout(
            Duration::from_secs(5),
            layers.wait_for(|l| l.encoding_ids() == ["high", "low"]),
        )
        .await
        .unwrap()
        .unwrap();

        session.select_layer("low").await.unwrap();
        assert_eq!(*server.selections.lock(), vec![LayerSelection::new("low")]);

        session.stop().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(server.deleted.load(Ordering::SeqCst));
        assert!(reports.lock().is_empty());

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.event_name());
        }
        assert!(names.contains(&"session.links_discovered"));
        assert!(names.contains(&"session.layers_updated"));
        assert_eq!(
            names.iter().filter(|n| **n == "session.state_changed").count(),
            4
        );
    }

    #[tokio::test]
    async fn test_missing_events_relation_is_degraded() {
        let (base, _server) = start_server(Server::default()).await;
        let session = WhepSession::new(app_config(&base), None).unwrap();

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        match session.links().unwrap() {
            LinkDiscovery::Degraded { events, missing, .. } => {
                assert!(events.is_none());
                assert_eq!(missing, vec![EVENTS_RELATION.to_string()]);
            }
            other => panic!("unexpected discovery: {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(session.layers().is_empty());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_degraded_rejected_when_disallowed() {
        let (base, _server) = start_server(Server::default()).await;
        let mut config = app_config(&base);
        config.whep.allow_degraded = false;
        let session = WhepSession::new(config, None).unwrap();
        let reports = collect_reports(&session);

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, AppError::NegotiationFailed(_)));
        assert!(matches!(
            session.state(),
            SessionState::Failed {
                kind: ErrorKind::NegotiationFailed,
                ..
            }
        ));
        assert_eq!(reports.lock()[0].kind, ErrorKind::NegotiationFailed);
    }

    #[tokio::test]
    async fn test_rejected_offer_fails_session() {
        let router = Router::new().route(
            "/api/whep",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid token") }),
        );
        let base = serve(router).await;
        let session = WhepSession::new(app_config(&base), None).unwrap();
        let reports = collect_reports(&session);

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, AppError::NegotiationFailed(_)));
        assert!(session.state().is_terminal());

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("401"));
    }

    #[tokio::test]
    async fn test_stop_during_start_closes_session() {
        let (base, server) = start_server(Server {
            advertise_events: true,
            answer_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        })
        .await;
        let session = WhepSession::new(app_config(&base), None).unwrap();

        let starter = {
            let session = session.clone();
            tokio::spawn(async move { session.start().await })
        };

        let mut state = session.state_watch();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == SessionState::AwaitingAnswer),
        )
        .await
        .unwrap()
        .unwrap();

        session.stop().await;
        let result = tokio::time::timeout(Duration::from_secs(5), starter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.links().is_none());
        assert!(server.peers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_before_start_and_restart() {
        let session = WhepSession::new(app_config(&Url::parse("http://127.0.0.1:9").unwrap()), None).unwrap();

        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_select_layer_without_endpoint() {
        let session = WhepSession::new(app_config(&Url::parse("http://127.0.0.1:9").unwrap()), None).unwrap();
        let reports = collect_reports(&session);

        let err = session.select_layer("low").await.unwrap_err();
        assert!(matches!(err, AppError::LayerEndpointUnavailable));
        assert_eq!(reports.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (base, _server) = start_server(Server::default()).await;
        let session = WhepSession::new(app_config(&base), None).unwrap();

        session.start().await.unwrap();
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(session.state(), SessionState::Connected);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_inbound_video_reaches_media_stream() {
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "camera".to_owned(),
        ));
        let (base, _server) = start_server(Server {
            video: Some(video.clone()),
            ..Default::default()
        })
        .await;
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe();
        let session = WhepSession::new(app_config(&base), Some(bus)).unwrap();

        let writer = tokio::spawn(async move {
            loop {
                let sample = Sample {
                    data: Bytes::from_static(&[0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x00, 0x00]),
                    duration: Duration::from_millis(20),
                    ..Default::default()
                };
                let _ = video.write_sample(&sample).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        session.start().await.unwrap();

        let mut media = session.media_watch();
        let stream = tokio::time::timeout(
            Duration::from_secs(10),
            media.wait_for(|m| m.video().is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(stream.id(), Some("camera"));
        assert!(stream.audio().is_none());
        assert_eq!(stream.len(), 1);

        let added = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::TrackAdded { kind, stream_id, .. }) => break (kind, stream_id),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event bus closed: {e}"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(added, ("video".to_string(), "camera".to_string()));

        writer.abort();
        session.stop().await;
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_peer() {
        let (base, _server) = start_server(Server::default()).await;
        let session = WhepSession::new(app_config(&base), None).unwrap();
        session.start().await.unwrap();

        let peer = session.inner.peer.lock().clone().unwrap();
        let mut peer_state = peer.state_watch();
        drop(session);

        tokio::time::timeout(
            Duration::from_secs(5),
            peer_state.wait_for(|s| *s == PeerState::Closed),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
