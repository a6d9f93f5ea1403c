//! Simulcast layer metadata
//!
//! The server pushes `layers` events shaped like
//! `{"1": {"layers": [{"encodingId": "high"}, {"encodingId": "low"}]}}`,
//! keyed by media id. Each event replaces the known layer set.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Event name carrying layer metadata
pub const LAYERS_EVENT: &str = "layers";
/// Media id of the video track in layer payloads
pub const DEFAULT_MEDIA_ID: &str = "1";

/// Ordered encoding ids of the currently available video layers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerSet(Vec<String>);

impl LayerSet {
    pub fn new(encoding_ids: Vec<String>) -> Self {
        Self(encoding_ids)
    }

    pub fn encoding_ids(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, encoding_id: &str) -> bool {
        self.0.iter().any(|id| id == encoding_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for LayerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Deserialize)]
struct MediaLayers {
    layers: Vec<LayerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerEntry {
    encoding_id: String,
}

/// Decode a `layers` event payload for `media_id`
pub fn parse_layers_event(data: &str, media_id: &str) -> Result<LayerSet> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| AppError::malformed(LAYERS_EVENT, format!("invalid JSON: {}", e)))?;

    let media = value.get(media_id).ok_or_else(|| {
        AppError::malformed(LAYERS_EVENT, format!("missing media id \"{}\"", media_id))
    })?;

    let media = MediaLayers::deserialize(media)
        .map_err(|e| AppError::malformed(LAYERS_EVENT, e.to_string()))?;

    Ok(media
        .layers
        .into_iter()
        .map(|layer| layer.encoding_id)
        .collect())
}

/// Body of a layer-switch request to the layer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSelection {
    pub media_id: String,
    pub encoding_id: String,
}

impl LayerSelection {
    pub fn new(encoding_id: impl Into<String>) -> Self {
        Self {
            media_id: DEFAULT_MEDIA_ID.to_string(),
            encoding_id: encoding_id.into(),
        }
    }
}
