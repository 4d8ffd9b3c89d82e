//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the two competing sides. `P1` defends the left goal, `P2` the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    P1,
    P2,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::P1, Side::P2];

    pub fn opponent(self) -> Side {
        match self {
            Side::P1 => Side::P2,
            Side::P2 => Side::P1,
        }
    }

    /// Index into per-side arrays
    pub fn index(self) -> usize {
        match self {
            Side::P1 => 0,
            Side::P2 => 1,
        }
    }
}

/// Kind of match as assigned by whoever created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Ad-hoc match between two players
    Quick,
    /// Match that belongs to a tournament bracket
    Tournament,
}

impl Default for MatchType {
    fn default() -> Self {
        Self::Quick
    }
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ScoreLimit,
    Disconnection,
    Surrender,
    Timeout,
}

/// Per-side score pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub p1: u8,
    pub p2: u8,
}

impl Scores {
    pub fn get_mut(&mut self, side: Side) -> &mut u8 {
        match side {
            Side::P1 => &mut self.p1,
            Side::P2 => &mut self.p2,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Paddle direction change
    Input {
        /// -1 = down, 0 = stop, 1 = up
        direction: i8,
        /// Send time on the match clock (see `pong.server_time`); receive time when absent
        #[serde(default)]
        timestamp: Option<u64>,
    },

    /// Give up the match
    Surrender,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Confirmation that a side is attached to the match
    GameJoined {
        match_id: Uuid,
        side: Side,
        scores: Scores,
        match_type: MatchType,
        #[serde(skip_serializing_if = "Option::is_none")]
        tournament_id: Option<Uuid>,
        is_final: bool,
    },

    /// Simulation (re)started
    GameStarted { timestamp: u64, message: String },

    /// Simulation paused
    GameStopped { message: String },

    /// Authoritative state, sent once per processed tick
    GameUpdate {
        timestamp: u64,
        p1: PaddleSnapshot,
        p2: PaddleSnapshot,
        ball: BallSnapshot,
    },

    /// A goal was scored
    Score { scoring_side: Side, scores: Scores },

    /// Ball respawned; it starts moving at `timestamp`
    GenerateBall { timestamp: u64, direction: [f32; 2] },

    /// Match is over
    GameEnded {
        winner_id: Uuid,
        scores: Scores,
        reason: EndReason,
        match_type: MatchType,
        #[serde(skip_serializing_if = "Option::is_none")]
        tournament_id: Option<Uuid>,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        /// Match clock, unix milliseconds, for input timestamps
        server_time: u64,
    },
}

/// Paddle state in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddleSnapshot {
    pub pos: [f32; 2],
    pub dir: i8,
}

/// Ball state in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub pos: [f32; 2],
    pub dir: [f32; 2],
    pub speed: f32,
    pub moving: bool,
}
