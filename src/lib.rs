//! whep-viewer - receive-only WHEP client
//!
//! This crate negotiates WebRTC playback sessions against WHEP endpoints,
//! follows simulcast layer announcements over server-sent events and hands
//! the inbound media to a pluggable player.

pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod whep;

pub use error::{AppError, Result};
