//! Discrete match events for fan-out to other systems

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::EndReason;

/// Events raised by a match for the rest of the system
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    /// Raised on every goal
    ScoreUpdated {
        match_id: Uuid,
        score1: u8,
        score2: u8,
        timestamp: DateTime<Utc>,
    },

    /// Raised exactly once per match, on its terminal transition
    MatchFinished {
        match_id: Uuid,
        player1_id: Uuid,
        player2_id: Uuid,
        score1: u8,
        score2: u8,
        winner_id: Uuid,
        reason: EndReason,
        /// Paddle hits per side
        hit_counts: [u32; 2],
        is_tournament_final: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Receiver of match events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: MatchEvent);
}

/// Sink that republishes on a broadcast channel
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<MatchEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: MatchEvent) {
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

/// Sink that keeps everything in memory
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<MatchEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<MatchEvent> {
        self.events.lock().clone()
    }

    pub fn finished(&self) -> Vec<MatchEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, MatchEvent::MatchFinished { .. }))
            .collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn publish(&self, event: MatchEvent) {
        self.events.lock().push(event);
    }
}
