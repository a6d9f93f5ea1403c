//! Playback sink
//!
//! Binds an inbound media stream to a player once both the stream and a
//! rendering surface exist. The player itself is supplied by the caller
//! through the [`Player`] trait.

pub mod cachebust;
pub mod sink;

use serde::{Deserialize, Serialize};

pub use cachebust::rewrite_uri;
pub use sink::{PlaybackSink, Player, RequestHook};

/// Player options passed through from the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    /// Start playing as soon as the player is initialized
    pub autoplay: bool,
    /// Source list handed to the player
    pub sources: Vec<PlaybackSource>,
}

/// One entry of the player source list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSource {
    pub src: String,
    /// MIME type, e.g. `application/x-mpegURL`
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_wire_format() {
        let options: PlaybackOptions = serde_json::from_value(serde_json::json!({
            "autoplay": true,
            "sources": [{ "src": "/hls/stream.m3u8", "type": "application/x-mpegURL" }]
        }))
        .unwrap();

        assert!(options.autoplay);
        assert_eq!(options.sources[0].kind, "application/x-mpegURL");

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["sources"][0]["type"], "application/x-mpegURL");
    }
}
