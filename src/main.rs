use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use whep_viewer::config::ConfigStore;
use whep_viewer::events::{EventBus, SessionEvent};
use whep_viewer::playback::{PlaybackOptions, PlaybackSink, PlaybackSource, Player, RequestHook};
use whep_viewer::whep::{RemoteMediaStream, TrackKind, WhepSession};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// whep-viewer command line arguments
#[derive(Parser, Debug)]
#[command(name = "whep-viewer")]
#[command(version, about = "Receive-only WHEP viewer", long_about = None)]
struct CliArgs {
    /// Configuration file (default: $WHEP_VIEWER_CONFIG or ./whep-viewer.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Signaling base URL, e.g. http://localhost:8090 (overrides config)
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: Option<String>,

    /// Bearer token (overrides config)
    #[arg(short = 't', long, value_name = "TOKEN")]
    token: Option<String>,

    /// Ask the server for this simulcast layer once connected
    #[arg(long, value_name = "ENCODING_ID")]
    select_layer: Option<String>,

    /// Session event topics to log, e.g. `session.*` or `session.layers_updated`
    #[arg(long = "event", value_name = "TOPIC", default_value = "*")]
    events: Vec<String>,

    /// Seconds between packet statistics lines
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    stats_interval: u64,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting whep-viewer v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    tracing::info!("Configuration file: {}", config_path.display());
    let config_store = ConfigStore::open(&config_path).await?;
    let mut config = (*config_store.get()).clone();
    if let Some(endpoint) = args.endpoint {
        config.whep.endpoint_base = endpoint;
    }
    if let Some(token) = args.token {
        config.whep.token = Some(token);
    }

    let events = Arc::new(EventBus::new());
    let shutdown = CancellationToken::new();
    let event_logger = tokio::spawn(log_events(
        events.subscribe(),
        args.events.clone(),
        shutdown.clone(),
    ));

    let session = WhepSession::new(config.clone(), Some(events))?;
    session.set_error_handler(|report| {
        tracing::debug!("Error callback: {} at {}", report.kind, report.at);
    });

    let mut sink = PlaybackSink::<PacketCounter>::new(config.playback.clone());
    sink.on_ready(|player| tracing::info!("Player ready, autoplay={}", player.autoplay));
    sink.set_surface(ConsoleSurface {
        stats_interval: Duration::from_secs(args.stats_interval.max(1)),
        cancel: shutdown.child_token(),
    })?;
    let playback = tokio::spawn(feed_sink(sink, session.clone(), shutdown.clone()));

    let started = tokio::select! {
        result = session.start() => Some(result),
        _ = wait_for_ctrl_c() => None,
    };

    match started {
        Some(Ok(())) => {
            tracing::info!("Session {} connected", session.id());
            if let Some(encoding_id) = args.select_layer.as_deref() {
                if let Err(e) = session.select_layer(encoding_id).await {
                    tracing::warn!("Layer selection failed: {}", e);
                }
            }
            wait_for_ctrl_c().await;
        }
        Some(Err(e)) => {
            shutdown.cancel();
            session.stop().await;
            return Err(e.into());
        }
        None => {}
    }

    session.stop().await;
    shutdown.cancel();
    let _ = playback.await;
    let _ = event_logger.await;

    tracing::info!("Viewer shutdown complete");
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Hand every media stream update to the playback sink
async fn feed_sink(
    mut sink: PlaybackSink<PacketCounter>,
    session: WhepSession,
    cancel: CancellationToken,
) {
    let mut media = session.media_watch();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = media.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let stream = media.borrow_and_update().clone();
        if stream.is_empty() {
            continue;
        }
        if let Err(e) = sink.set_stream(stream) {
            tracing::error!("Failed to initialize player: {}", e);
        }
    }

    if let Some(player) = sink.player() {
        player.log_totals();
    }
}

async fn log_events(
    mut rx: broadcast::Receiver<SessionEvent>,
    topics: Vec<String>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        if let Ok(event) = &event {
            if !topics.iter().any(|topic| event.matches_topic(topic)) {
                continue;
            }
        }

        match event {
            Ok(SessionEvent::LinksDiscovered {
                layer_url,
                events_url,
                missing,
                ..
            }) => {
                tracing::info!(
                    "Links: layer={} events={}",
                    layer_url.as_deref().unwrap_or("-"),
                    events_url.as_deref().unwrap_or("-")
                );
                if !missing.is_empty() {
                    tracing::warn!("Server did not advertise: {}", missing.join(", "));
                }
            }
            Ok(SessionEvent::LayersUpdated { encoding_ids, .. }) => {
                tracing::info!("Available layers: [{}]", encoding_ids.join(", "));
            }
            Ok(event) => tracing::debug!("{}: {:?}", event.event_name(), event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event logger lagged, {} events dropped", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Terminal "rendering surface": statistics go to the log
struct ConsoleSurface {
    stats_interval: Duration,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TrackCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
}

/// Player that drains RTP from each track and counts packets
struct PacketCounter {
    cancel: CancellationToken,
    autoplay: bool,
    counters: Arc<Mutex<Vec<(TrackKind, String, Arc<TrackCounters>)>>>,
    attached: HashSet<String>,
}

impl PacketCounter {
    fn log_totals(&self) {
        for (kind, id, counters) in self.counters.lock().iter() {
            tracing::info!(
                "{} track {}: {} packets, {} bytes",
                kind,
                id,
                counters.packets.load(Ordering::Relaxed),
                counters.bytes.load(Ordering::Relaxed)
            );
        }
    }
}

impl Player for PacketCounter {
    type Surface = ConsoleSurface;
    type Stream = RemoteMediaStream;

    fn create(surface: &ConsoleSurface, _options: &PlaybackOptions) -> whep_viewer::Result<Self> {
        let counters: Arc<Mutex<Vec<(TrackKind, String, Arc<TrackCounters>)>>> = Arc::default();

        let stats = counters.clone();
        let cancel = surface.cancel.clone();
        let interval = surface.stats_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                for (kind, id, counters) in stats.lock().iter() {
                    tracing::info!(
                        "{} {}: {} packets",
                        kind,
                        id,
                        counters.packets.load(Ordering::Relaxed)
                    );
                }
            }
        });

        Ok(Self {
            cancel: surface.cancel.clone(),
            autoplay: false,
            counters,
            attached: HashSet::new(),
        })
    }

    fn attach_stream(&mut self, stream: &RemoteMediaStream) {
        for kind in [TrackKind::Audio, TrackKind::Video] {
            let Some(track) = stream.track(kind) else {
                continue;
            };
            let id = track.id();
            if !self.attached.insert(id.clone()) {
                continue;
            }

            let counters = Arc::new(TrackCounters::default());
            self.counters.lock().push((kind, id.clone(), counters.clone()));

            let track = track.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    let read = tokio::select! {
                        _ = cancel.cancelled() => break,
                        read = track.read_rtp() => read,
                    };
                    match read {
                        Ok((packet, _)) => {
                            counters.packets.fetch_add(1, Ordering::Relaxed);
                            counters
                                .bytes
                                .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::debug!("{} track {} ended: {}", kind, id, e);
                            break;
                        }
                    }
                }
            });
        }
    }

    fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    fn set_sources(&mut self, sources: &[PlaybackSource]) {
        for source in sources {
            tracing::info!("Fallback source: {} ({})", source.src, source.kind);
        }
    }

    fn set_request_hook(&mut self, hook: RequestHook) {
        tracing::debug!("Playlist requests rewritten, e.g. {}", hook("live.m3u8"));
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "whep_viewer=error,webrtc=error",
        LogLevel::Warn => "whep_viewer=warn,webrtc=warn",
        LogLevel::Info => "whep_viewer=info,webrtc=warn",
        LogLevel::Verbose => "whep_viewer=debug,webrtc=warn",
        LogLevel::Debug => "whep_viewer=debug,webrtc=info",
        LogLevel::Trace => "whep_viewer=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("WHEP_VIEWER_CONFIG") {
        return PathBuf::from(path);
    }

    PathBuf::from("whep-viewer.toml")
}
