//! Inbound media stream assembly
//!
//! Tracks arrive one `on_track` callback at a time. They are merged into a
//! single stream by kind: a new track replaces an earlier one of the same
//! kind and sits alongside a track of the other kind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of an inbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Track as seen by the stream assembler
pub trait InboundTrack: Send + Sync {
    /// `None` for tracks of unknown kind, which are ignored
    fn kind(&self) -> Option<TrackKind>;
    fn id(&self) -> String;
    fn stream_id(&self) -> String;
}

impl InboundTrack for TrackRemote {
    fn kind(&self) -> Option<TrackKind> {
        match TrackRemote::kind(self) {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }

    fn id(&self) -> String {
        TrackRemote::id(self)
    }

    fn stream_id(&self) -> String {
        TrackRemote::stream_id(self)
    }
}

/// One audio and one video slot
pub struct MediaStream<T> {
    id: Option<String>,
    audio: Option<Arc<T>>,
    video: Option<Arc<T>>,
}

impl<T> Default for MediaStream<T> {
    fn default() -> Self {
        Self {
            id: None,
            audio: None,
            video: None,
        }
    }
}

impl<T> Clone for MediaStream<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            audio: self.audio.clone(),
            video: self.video.clone(),
        }
    }
}

impl<T> std::fmt::Debug for MediaStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .finish()
    }
}

impl<T: InboundTrack> MediaStream<T> {
    /// Merge a track by kind, returning the track it replaced
    ///
    /// Tracks of unknown kind are handed back unchanged.
    pub fn merge(&mut self, track: Arc<T>) -> std::result::Result<Option<Arc<T>>, Arc<T>> {
        let Some(kind) = track.kind() else {
            return Err(track);
        };

        if self.id.is_none() {
            self.id = Some(track.stream_id());
        }

        let slot = match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        };
        Ok(slot.replace(track))
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<T>> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    pub fn audio(&self) -> Option<&Arc<T>> {
        self.audio.as_ref()
    }

    pub fn video(&self) -> Option<&Arc<T>> {
        self.video.as_ref()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Arc<T>> {
        self.audio.iter().chain(self.video.iter())
    }
}

impl<T> MediaStream<T> {
    /// Stream id of the first merged track
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn len(&self) -> usize {
        usize::from(self.audio.is_some()) + usize::from(self.video.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}
