//! Fixed-rate authoritative stepper
//!
//! Each processed tick replays both players' buffered inputs in timestamp
//! order, advancing the arena between input boundaries.

use tracing::debug;

use crate::util::time::TICK_DURATION_MS;

use super::entities::Arena;
use super::input::{InputHistory, InputSample};
use super::physics::{CollisionEvent, CollisionSystem};
use super::snapshot::{GameSnapshot, SnapshotHistory};

/// Stepper tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruthConfig {
    /// Minimum wall-clock gap between processed ticks
    pub tick_ms: u64,
    /// Hard cap on match duration, measured from the first start
    pub max_duration_ms: u64,
    /// Snapshots retained for diagnostics
    pub history_len: usize,
}

impl Default for TruthConfig {
    fn default() -> Self {
        Self {
            tick_ms: TICK_DURATION_MS,
            max_duration_ms: 5 * 60 * 1000,
            history_len: 60,
        }
    }
}

/// Result of one `tick` call
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not enough time has passed since the last processed tick
    Idle,
    Stepped(GameSnapshot),
    /// The duration cap has been reached
    Expired,
}

pub struct TruthManager {
    config: TruthConfig,
    last_tick: u64,
    started_at: Option<u64>,
    tick: u64,
    history: SnapshotHistory,
}

impl TruthManager {
    pub fn new(config: TruthConfig, now: u64) -> Self {
        Self {
            config,
            last_tick: now,
            started_at: None,
            tick: 0,
            history: SnapshotHistory::new(config.history_len),
        }
    }

    /// Begin (or continue) simulating from `now`. The first call starts the duration clock.
    pub fn start(&mut self, now: u64) {
        self.started_at.get_or_insert(now);
        self.last_tick = now;
    }

    /// Pick up after a pause without simulating the paused interval.
    ///
    /// Inputs buffered during the pause are consumed and only the newest
    /// direction per paddle is kept.
    pub fn resume(&mut self, now: u64, arena: &mut Arena, inputs: [&InputHistory; 2]) {
        for (paddle, history) in arena.paddles.iter_mut().zip(inputs) {
            if let Some(last) = history.range(self.last_tick, now).last() {
                paddle.set_direction(last.direction);
            }
        }
        self.start(now);
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.started_at
            .map(|start| now.saturating_sub(start) >= self.config.max_duration_ms)
            .unwrap_or(false)
    }

    pub fn tick(
        &mut self,
        now: u64,
        arena: &mut Arena,
        inputs: [&InputHistory; 2],
        events: &mut Vec<CollisionEvent>,
    ) -> TickOutcome {
        if self.is_expired(now) {
            return TickOutcome::Expired;
        }

        if now.saturating_sub(self.last_tick) < self.config.tick_ms {
            return TickOutcome::Idle;
        }

        let from = self.last_tick;
        let p1 = inputs[0].range(from, now);
        let p2 = inputs[1].range(from, now);
        if !p1.is_empty() || !p2.is_empty() {
            debug!(
                tick = self.tick + 1,
                p1_inputs = p1.len(),
                p2_inputs = p2.len(),
                "Applying buffered inputs"
            );
        }

        Self::simulate(arena, from, now, &p1, &p2, events);

        self.last_tick = now;
        self.tick += 1;
        let snapshot = GameSnapshot::capture(self.tick, now, arena);
        self.history.push(snapshot.clone());
        TickOutcome::Stepped(snapshot)
    }

    /// Advance `arena` from `from` to `to`, applying both input streams at their timestamps.
    ///
    /// Equal timestamps take effect at the same simulated instant. Samples
    /// outside `(from, to]` are ignored.
    pub fn simulate(
        arena: &mut Arena,
        from: u64,
        to: u64,
        p1: &[InputSample],
        p2: &[InputSample],
        events: &mut Vec<CollisionEvent>,
    ) {
        let mut cursor = from;
        let (mut i, mut j) = (0, 0);

        loop {
            let next = match (p1.get(i), p2.get(j)) {
                (Some(a), Some(b)) => a.timestamp.min(b.timestamp),
                (Some(a), None) => a.timestamp,
                (None, Some(b)) => b.timestamp,
                (None, None) => break,
            };
            if next > to {
                break;
            }

            Self::advance(arena, cursor, next, events);
            cursor = cursor.max(next);

            while let Some(sample) = p1.get(i).filter(|s| s.timestamp == next) {
                if sample.timestamp > from {
                    arena.paddles[0].set_direction(sample.direction);
                }
                i += 1;
            }
            while let Some(sample) = p2.get(j).filter(|s| s.timestamp == next) {
                if sample.timestamp > from {
                    arena.paddles[1].set_direction(sample.direction);
                }
                j += 1;
            }
        }

        Self::advance(arena, cursor, to, events);
    }

    /// Move everything from `from` to `to`, releasing a served ball when its delay ends
    fn advance(arena: &mut Arena, from: u64, to: u64, events: &mut Vec<CollisionEvent>) {
        if to <= from {
            return;
        }

        let mut cursor = from;
        if let Some(resume_at) = arena.ball.resume_at {
            if !arena.ball.moving && resume_at < to {
                if resume_at > cursor {
                    CollisionSystem::step(arena, millis_to_secs(resume_at - cursor), events);
                    cursor = resume_at;
                }
                arena.ball.resume_if_due(cursor);
            }
        }

        CollisionSystem::step(arena, millis_to_secs(to - cursor), events);
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    #[cfg(test)]
    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Drop buffered diagnostics
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

fn millis_to_secs(ms: u64) -> f32 {
    ms as f32 / 1000.0
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::game::entities::SimulationParams;
    use crate::ws::protocol::Side;

    fn arena() -> Arena {
        Arena::new(SimulationParams::default())
    }

    fn samples(list: &[(u64, i8)]) -> Vec<InputSample> {
        list.iter().map(|&(t, d)| InputSample::new(t, d)).collect()
    }

    #[test]
    fn tick_waits_for_a_full_tick_duration() {
        let mut truth = TruthManager::new(TruthConfig::default(), 1_000);
        truth.start(1_000);
        let mut arena = arena();
        let (a, b) = (InputHistory::new(), InputHistory::new());
        let mut events = Vec::new();

        assert_eq!(
            truth.tick(1_020, &mut arena, [&a, &b], &mut events),
            TickOutcome::Idle
        );
        match truth.tick(1_040, &mut arena, [&a, &b], &mut events) {
            TickOutcome::Stepped(snapshot) => {
                assert_eq!(snapshot.tick, 1);
                assert_eq!(snapshot.timestamp, 1_040);
            }
            other => panic!("expected a step, got {:?}", other),
        }
        assert_eq!(truth.last_tick(), 1_040);
        assert_eq!(truth.history().len(), 1);
    }

    #[test]
    fn inputs_take_effect_at_their_timestamps() {
        let mut arena = arena();
        let speed = arena.params.paddle_speed;
        let mut events = Vec::new();
        let p1 = samples(&[(100, 1), (200, 0)]);
        let p2 = samples(&[(150, -1)]);

        TruthManager::simulate(&mut arena, 0, 300, &p1, &p2, &mut events);

        assert!((arena.paddle(Side::P1).position.y - speed * 0.1).abs() < 1e-4);
        assert!((arena.paddle(Side::P2).position.y + speed * 0.15).abs() < 1e-4);
        assert_eq!(arena.paddle(Side::P1).direction, 0);
        assert_eq!(arena.paddle(Side::P2).direction, -1);
    }

    #[test]
    fn equal_timestamps_apply_to_both_sides_at_once() {
        let mut arena = arena();
        let mut events = Vec::new();
        let p1 = samples(&[(100, 1)]);
        let p2 = samples(&[(100, 1)]);
        TruthManager::simulate(&mut arena, 0, 200, &p1, &p2, &mut events);
        assert_eq!(
            arena.paddle(Side::P1).position.y,
            arena.paddle(Side::P2).position.y
        );
    }

    #[test]
    fn replaying_the_same_inputs_is_deterministic() {
        let mut start = arena();
        start.serve(0, Side::P2, 0.4);
        let p1 = samples(&[(40, 1), (90, -1), (90, 0), (400, 1), (1_700, -1)]);
        let p2 = samples(&[(10, -1), (90, 1), (650, 0), (1_200, 1)]);

        let run = || {
            let mut arena = start.clone();
            let mut events = Vec::new();
            TruthManager::simulate(&mut arena, 0, 3_000, &p1, &p2, &mut events);
            (arena, events)
        };

        let (first, first_events) = run();
        let (second, second_events) = run();
        assert_eq!(first, second);
        assert_eq!(first_events, second_events);
        assert!(first.ball.moving || !first_events.is_empty());
    }

    #[test]
    fn served_ball_waits_for_the_serve_delay() {
        let mut arena = arena();
        arena.serve(0, Side::P2, 0.0);
        let delay = arena.params.serve_delay_ms;
        let mut events = Vec::new();

        TruthManager::simulate(&mut arena, 0, delay, &[], &[], &mut events);
        assert!(!arena.ball.moving);
        assert_eq!(arena.ball.position, Vec2::ZERO);

        TruthManager::simulate(&mut arena, delay, delay + 100, &[], &[], &mut events);
        assert!(arena.ball.moving);
        let expected = arena.params.ball_min_speed * 0.1;
        assert!((arena.ball.position.x - expected).abs() < 1e-4);
    }

    #[test]
    fn serve_delay_ending_mid_window_moves_only_the_remainder() {
        let mut arena = arena();
        arena.serve(0, Side::P1, 0.0);
        let delay = arena.params.serve_delay_ms;
        let mut events = Vec::new();
        TruthManager::simulate(&mut arena, delay - 50, delay + 50, &[], &[], &mut events);
        let expected = -arena.params.ball_min_speed * 0.05;
        assert!((arena.ball.position.x - expected).abs() < 1e-4);
    }

    #[test]
    fn duration_cap_expires_the_match() {
        let config = TruthConfig {
            max_duration_ms: 1_000,
            ..TruthConfig::default()
        };
        let mut truth = TruthManager::new(config, 0);
        let mut arena = arena();
        let (a, b) = (InputHistory::new(), InputHistory::new());
        let mut events = Vec::new();

        assert!(!truth.is_expired(5_000));
        truth.start(0);
        assert!(!truth.is_expired(999));
        assert_eq!(
            truth.tick(1_000, &mut arena, [&a, &b], &mut events),
            TickOutcome::Expired
        );
    }

    #[test]
    fn resume_skips_the_paused_interval_but_keeps_the_latest_direction() {
        let mut truth = TruthManager::new(TruthConfig::default(), 0);
        truth.start(0);
        let mut arena = arena();
        let (a, b) = (InputHistory::new(), InputHistory::new());
        a.append(InputSample::new(500, 1)).unwrap();
        a.append(InputSample::new(900, -1)).unwrap();

        truth.resume(1_000, &mut arena, [&a, &b]);
        assert_eq!(arena.paddle(Side::P1).direction, -1);
        assert_eq!(arena.paddle(Side::P1).position.y, 0.0);
        assert_eq!(truth.last_tick(), 1_000);
        assert_eq!(truth.started_at(), Some(0));
    }

    #[test]
    fn inputs_from_histories_are_consumed_once() {
        let mut truth = TruthManager::new(TruthConfig::default(), 0);
        truth.start(0);
        let mut arena = arena();
        let (a, b) = (InputHistory::new(), InputHistory::new());
        a.append(InputSample::new(10, 1)).unwrap();
        let mut events = Vec::new();

        truth.tick(40, &mut arena, [&a, &b], &mut events);
        let after_first = arena.paddle(Side::P1).position.y;
        assert!(after_first > 0.0);

        // A late sample for an already simulated instant is refused.
        assert!(a.append(InputSample::new(30, 0)).is_err());
        truth.tick(80, &mut arena, [&a, &b], &mut events);
        assert!(arena.paddle(Side::P1).position.y > after_first);
    }
}
