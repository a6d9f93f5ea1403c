use tracing::{debug, info};

use super::{rewrite_uri, PlaybackOptions, PlaybackSource};
use crate::error::Result;

/// Hook applied to every URI the player requests
pub type RequestHook = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Media player driven by a [`PlaybackSink`]
pub trait Player: Sized {
    /// Where the player renders
    type Surface;
    /// Media the player consumes
    type Stream;

    /// Create a player on `surface`
    fn create(surface: &Self::Surface, options: &PlaybackOptions) -> Result<Self>;

    /// Bind the current media stream; called again when the stream changes
    fn attach_stream(&mut self, stream: &Self::Stream);

    fn set_autoplay(&mut self, autoplay: bool);

    fn set_sources(&mut self, sources: &[PlaybackSource]);

    fn set_request_hook(&mut self, hook: RequestHook);
}

/// Lazily initialized player
///
/// The player is created at most once, on the first call that finds both a
/// surface and a stream present.
pub struct PlaybackSink<P: Player> {
    options: PlaybackOptions,
    surface: Option<P::Surface>,
    stream: Option<P::Stream>,
    player: Option<P>,
    on_ready: Option<Box<dyn FnOnce(&mut P) + Send>>,
}

impl<P: Player> PlaybackSink<P> {
    pub fn new(options: PlaybackOptions) -> Self {
        Self {
            options,
            surface: None,
            stream: None,
            player: None,
            on_ready: None,
        }
    }

    /// Callback run once right after the player is created
    pub fn on_ready<F>(&mut self, f: F)
    where
        F: FnOnce(&mut P) + Send + 'static,
    {
        self.on_ready = Some(Box::new(f));
    }

    /// Provide the rendering surface; returns true if this initialized the player
    pub fn set_surface(&mut self, surface: P::Surface) -> Result<bool> {
        self.surface = Some(surface);
        self.try_init()
    }

    /// Provide or replace the media stream; returns true if this initialized the player
    pub fn set_stream(&mut self, stream: P::Stream) -> Result<bool> {
        if let Some(player) = self.player.as_mut() {
            debug!("Rebinding media stream to existing player");
            player.attach_stream(&stream);
        }
        self.stream = Some(stream);
        self.try_init()
    }

    pub fn is_initialized(&self) -> bool {
        self.player.is_some()
    }

    pub fn player(&self) -> Option<&P> {
        self.player.as_ref()
    }

    pub fn player_mut(&mut self) -> Option<&mut P> {
        self.player.as_mut()
    }

    fn try_init(&mut self) -> Result<bool> {
        if self.player.is_some() {
            return Ok(false);
        }
        let (Some(surface), Some(stream)) = (self.surface.as_ref(), self.stream.as_ref()) else {
            return Ok(false);
        };

        info!("Initializing player ({} sources)", self.options.sources.len());
        let mut player = P::create(surface, &self.options)?;
        player.attach_stream(stream);
        player.set_autoplay(self.options.autoplay);
        player.set_sources(&self.options.sources);
        player.set_request_hook(Box::new(rewrite_uri));

        if let Some(on_ready) = self.on_ready.take() {
            on_ready(&mut player);
        }
        self.player = Some(player);
        Ok(true)
    }
}
