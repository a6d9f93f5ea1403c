//! Supervised server-sent-events subscription
//!
//! Runs beside the offer/answer chain for the lifetime of a session. The
//! task reconnects with exponential backoff when the stream fails or ends,
//! gives up after the configured number of consecutive failures and exits
//! as soon as the session's cancellation token fires.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use reqwest::Url;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::layers::{parse_layers_event, LayerSet, DEFAULT_MEDIA_ID, LAYERS_EVENT};
use super::report::Reporter;
use super::retry::Backoff;
use super::signaling::SignalingClient;
use super::sse::{SseDecoder, SseEvent};
use crate::config::EventStreamConfig;
use crate::error::{AppError, Result};
use crate::events::SessionEvent;

pub(crate) struct EventStreamTask {
    pub signaling: SignalingClient,
    pub url: Url,
    pub config: EventStreamConfig,
    pub layers: Arc<watch::Sender<LayerSet>>,
    pub reporter: Reporter,
    pub cancel: CancellationToken,
}

impl EventStreamTask {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut decoder = SseDecoder::new();
        let mut backoff = Backoff::from_config(&self.config);

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.read_connection(&mut decoder, &mut backoff) => outcome,
            };

            match outcome {
                Ok(()) => debug!("Event stream {} ended", self.url),
                Err(e) => warn!("Event stream {} failed: {}", self.url, e),
            }

            if let Some(retry) = decoder.retry() {
                backoff.set_initial(retry);
            }

            let Some(delay) = backoff.next_delay() else {
                self.reporter.report(&AppError::EventStream(format!(
                    "Giving up on {} after {} attempts",
                    self.url,
                    backoff.attempts()
                )));
                break;
            };

            debug!(
                "Reconnecting event stream in {:?} (attempt {})",
                delay,
                backoff.attempts()
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Event stream task for {} stopped", self.url);
    }

    /// Read one connection until the body ends or fails
    async fn read_connection(&self, decoder: &mut SseDecoder, backoff: &mut Backoff) -> Result<()> {
        decoder.reset_connection();
        let last_event_id = decoder.last_event_id().map(str::to_owned);

        let response = self
            .signaling
            .event_stream_request(&self.url, last_event_id.as_deref())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::EventStream(format!("Server returned HTTP {}", status)));
        }

        info!("Event stream connected: {}", self.url);
        backoff.reset();

        let events = sse_events(response, decoder);
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            self.handle_event(event?);
        }

        Ok(())
    }

    fn handle_event(&self, event: SseEvent) {
        if event.event != LAYERS_EVENT {
            debug!("Ignoring {} event", event.event);
            return;
        }

        match parse_layers_event(&event.data, DEFAULT_MEDIA_ID) {
            Ok(layers) => {
                debug!("Layers updated: {:?}", layers.encoding_ids());
                self.reporter.publish(SessionEvent::LayersUpdated {
                    session_id: self.reporter.session_id().to_string(),
                    encoding_ids: layers.encoding_ids().to_vec(),
                });
                self.layers.send_replace(layers);
            }
            Err(e) => {
                self.reporter.report(&e);
            }
        }
    }
}

/// Decode a streaming response body into server-sent events
fn sse_events(
    response: reqwest::Response,
    decoder: &mut SseDecoder,
) -> impl Stream<Item = Result<SseEvent>> + '_ {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AppError::EventStream(format!("Read failed: {}", e)))?;
            for event in decoder.feed(&chunk)? {
                yield event;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::response::sse::{Event, Sse};
    use axum::routing::get;
    use axum::Router;
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::{ErrorKind, ErrorReport};
    use crate::whep::testing::{config_for, serve};

    fn layers_payload(ids: &[&str]) -> String {
        let layers: Vec<_> = ids
            .iter()
            .map(|id| serde_json::json!({ "encodingId": id }))
            .collect();
        serde_json::json!({ "1": { "layers": layers } }).to_string()
    }

    fn sse_router(events: Vec<(&'static str, String)>) -> Router {
        Router::new().route(
            "/api/sse/s1",
            get(move || {
                let events = events.clone();
                async move {
                    let stream = futures::stream::iter(events.into_iter().map(|(name, data)| {
                        Ok::<_, Infallible>(Event::default().event(name).data(data))
                    }));
                    Sse::new(stream)
                }
            }),
        )
    }

    struct Harness {
        layers: watch::Receiver<LayerSet>,
        reports: mpsc::UnboundedReceiver<ErrorReport>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    fn start(base: &Url, config: EventStreamConfig) -> Harness {
        let (layers_tx, layers) = watch::channel(LayerSet::default());
        let (report_tx, reports) = mpsc::unbounded_channel();
        let reporter = Reporter::new("s1".to_string(), None);
        reporter.set_handler(Arc::new(move |report| {
            let _ = report_tx.send(report);
        }));
        let cancel = CancellationToken::new();

        let handle = EventStreamTask {
            signaling: SignalingClient::new(&config_for(base)).unwrap(),
            url: base.join("/api/sse/s1").unwrap(),
            config,
            layers: Arc::new(layers_tx),
            reporter,
            cancel: cancel.clone(),
        }
        .spawn();

        Harness {
            layers,
            reports,
            cancel,
            handle,
        }
    }

    fn slow_retry() -> EventStreamConfig {
        EventStreamConfig {
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_last_layers_event_wins() {
        let base = serve(sse_router(vec![
            (LAYERS_EVENT, layers_payload(&["a", "b"])),
            ("message", "ignored".to_string()),
            (LAYERS_EVENT, layers_payload(&["c"])),
        ]))
        .await;
        let mut harness = start(&base, slow_retry());

        let layers = tokio::time::timeout(
            Duration::from_secs(5),
            harness.layers.wait_for(|l| l.encoding_ids() == ["c"]),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(layers, LayerSet::new(vec!["c".to_string()]));
        assert!(harness.reports.try_recv().is_err());

        harness.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), harness.handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_event_keeps_previous_layers() {
        let base = serve(sse_router(vec![
            (LAYERS_EVENT, layers_payload(&["a"])),
            (LAYERS_EVENT, "not json".to_string()),
        ]))
        .await;
        let mut harness = start(&base, slow_retry());

        let report = tokio::time::timeout(Duration::from_secs(5), harness.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.kind, ErrorKind::MalformedEvent);
        assert_eq!(harness.layers.borrow().encoding_ids(), ["a"]);

        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let router = Router::new().route(
            "/api/sse/s1",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = serve(router).await;
        let mut harness = start(
            &base,
            EventStreamConfig {
                initial_delay_ms: 5,
                max_delay_ms: 20,
                max_attempts: 3,
            },
        );

        let report = tokio::time::timeout(Duration::from_secs(5), harness.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.kind, ErrorKind::EventStream);
        assert!(report.message.contains("3 attempts"), "{}", report.message);

        tokio::time::timeout(Duration::from_secs(5), harness.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(harness.layers.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_reconnects_after_stream_ends() {
        let base = serve(sse_router(vec![(LAYERS_EVENT, layers_payload(&["x"]))])).await;
        let mut harness = start(
            &base,
            EventStreamConfig {
                initial_delay_ms: 10,
                max_delay_ms: 10,
                max_attempts: 2,
            },
        );

        harness.layers.changed().await.unwrap();
        // Each reconnect succeeds and resets the attempt counter, so the
        // stream is never abandoned.
        harness.layers.changed().await.unwrap();
        assert_eq!(harness.layers.borrow().encoding_ids(), ["x"]);
        assert!(harness.reports.try_recv().is_err());

        harness.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), harness.handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_oversized_line_drops_connection() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/api/sse/s1",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    (
                        [("content-type", "text/event-stream")],
                        "a".repeat(2 * crate::whep::sse::MAX_LINE_LENGTH),
                    )
                }
            }),
        );
        let base = serve(router).await;
        let harness = start(
            &base,
            EventStreamConfig {
                initial_delay_ms: 10,
                max_delay_ms: 10,
                max_attempts: 3,
            },
        );

        tokio::time::timeout(Duration::from_secs(10), async {
            while hits.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(harness.layers.borrow().is_empty());

        harness.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), harness.handle)
            .await
            .unwrap()
            .unwrap();
    }
}
