//! Configuration: TOML schema and file-backed store

mod schema;
mod store;

pub use schema::{
    AppConfig, EventStreamConfig, MdnsMode, TurnServer, WhepConfig, EVENTS_RELATION,
    LAYER_RELATION,
};
pub use store::{ConfigChange, ConfigStore};
