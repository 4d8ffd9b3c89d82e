//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{BroadcastEventSink, MatchRegistry};

/// Capacity of the match event fan-out channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_registry: Arc<MatchRegistry>,
    pub events: BroadcastEventSink,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let events = BroadcastEventSink::new(EVENT_CHANNEL_CAPACITY);
        let match_registry = Arc::new(MatchRegistry::new(
            config.lifecycle_config(),
            Arc::new(events.clone()),
        ));

        Self {
            config,
            match_registry,
            events,
        }
    }
}
