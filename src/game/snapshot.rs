//! Snapshot capture and rolling history

use std::collections::VecDeque;

use crate::ws::protocol::{BallSnapshot, PaddleSnapshot, ServerMsg};

use super::entities::{Arena, Ball, Paddle};

/// Authoritative state after one processed tick
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    pub tick: u64,
    pub timestamp: u64,
    pub p1: PaddleSnapshot,
    pub p2: PaddleSnapshot,
    pub ball: BallSnapshot,
}

impl GameSnapshot {
    pub fn capture(tick: u64, timestamp: u64, arena: &Arena) -> Self {
        Self {
            tick,
            timestamp,
            p1: paddle_snapshot(&arena.paddles[0]),
            p2: paddle_snapshot(&arena.paddles[1]),
            ball: ball_snapshot(&arena.ball),
        }
    }

    /// Build the per-tick update message
    pub fn to_message(&self) -> ServerMsg {
        ServerMsg::GameUpdate {
            timestamp: self.timestamp,
            p1: self.p1,
            p2: self.p2,
            ball: self.ball,
        }
    }
}

fn paddle_snapshot(paddle: &Paddle) -> PaddleSnapshot {
    PaddleSnapshot {
        pos: paddle.position.to_array(),
        dir: paddle.direction,
    }
}

fn ball_snapshot(ball: &Ball) -> BallSnapshot {
    BallSnapshot {
        pos: ball.position.to_array(),
        dir: ball.direction.to_array(),
        speed: ball.speed,
        moving: ball.moving,
    }
}

/// Bounded ring of recent snapshots, oldest evicted first
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    snapshots: VecDeque<GameSnapshot>,
    capacity: usize,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, snapshot: GameSnapshot) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&GameSnapshot> {
        self.snapshots.back()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
