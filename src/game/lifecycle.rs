//! Match lifecycle: readiness, reconnection forgiveness, scoring and termination

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ws::protocol::{EndReason, MatchType, Scores, ServerMsg, Side};

use super::entities::{Arena, SimulationParams};
use super::events::{EventSink, MatchEvent};
use super::input::InputHistory;
use super::physics::CollisionEvent;
use super::timers::{TimerId, TimerKind, TimerService};
use super::truth::{TickOutcome, TruthConfig, TruthManager};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Waiting for both sides (initially, or paused after a disconnect)
    Waiting,
    Playing,
    Ended,
}

/// Identity and metadata of a match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    pub id: Uuid,
    /// Indexed by `Side::index()`
    pub players: [Uuid; 2],
    pub match_type: MatchType,
    pub tournament_id: Option<Uuid>,
    pub is_final: bool,
}

impl MatchInfo {
    pub fn player(&self, side: Side) -> Uuid {
        self.players[side.index()]
    }

    pub fn side_of(&self, player_id: Uuid) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| self.player(*side) == player_id)
    }
}

/// Lifecycle tuning
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub start_grace: Duration,
    pub reconnect_grace: Duration,
    /// Connections a side may make before disconnects stop pausing the match
    pub reconnect_allowance: u32,
    pub win_score: u8,
    /// Delay between reaching the score cap and ending (non-final matches)
    pub celebration_delay: Duration,
    pub truth: TruthConfig,
    pub params: SimulationParams,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_secs(20),
            reconnect_grace: Duration::from_secs(10),
            reconnect_allowance: 3,
            win_score: 5,
            celebration_delay: Duration::from_secs(3),
            truth: TruthConfig::default(),
            params: SimulationParams::default(),
        }
    }
}

/// Pick the winner. Rows are checked in order; the first that applies decides.
///
/// 1. An explicit winner.
/// 2. A disconnection before either side reached the cap, with exactly one side connected.
/// 3. The higher score.
/// 4. The coin flip.
pub fn decide_winner(
    reason: EndReason,
    explicit: Option<Side>,
    scores: Scores,
    connected: [bool; 2],
    win_score: u8,
    coin_flip: impl FnOnce() -> Side,
) -> Side {
    if let Some(side) = explicit {
        return side;
    }

    let cap_reached = scores.p1 >= win_score || scores.p2 >= win_score;
    if reason == EndReason::Disconnection && !cap_reached {
        match connected {
            [true, false] => return Side::P1,
            [false, true] => return Side::P2,
            _ => {}
        }
    }

    match scores.p1.cmp(&scores.p2) {
        std::cmp::Ordering::Greater => Side::P1,
        std::cmp::Ordering::Less => Side::P2,
        std::cmp::Ordering::Equal => coin_flip(),
    }
}

/// One match: owns its arena, input histories, stepper and timers
pub struct MatchLifecycle<T: TimerService> {
    info: MatchInfo,
    config: LifecycleConfig,
    state: MatchState,
    scores: Scores,
    ready: [bool; 2],
    reconnections: [u32; 2],
    hit_counts: [u32; 2],
    /// Termination already scheduled after reaching the score cap
    finishing: bool,
    disposed: bool,
    timers: T,
    pending: HashMap<TimerKind, TimerId>,
    arena: Arena,
    inputs: [Arc<InputHistory>; 2],
    truth: TruthManager,
    rng: ChaCha8Rng,
    outbound: broadcast::Sender<ServerMsg>,
    sink: Arc<dyn EventSink>,
}

impl<T: TimerService> MatchLifecycle<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        info: MatchInfo,
        config: LifecycleConfig,
        timers: T,
        inputs: [Arc<InputHistory>; 2],
        outbound: broadcast::Sender<ServerMsg>,
        sink: Arc<dyn EventSink>,
        seed: u64,
        now: u64,
    ) -> Self {
        let mut lifecycle = Self {
            arena: Arena::new(config.params.clone()),
            truth: TruthManager::new(config.truth, now),
            info,
            config,
            state: MatchState::Waiting,
            scores: Scores::default(),
            ready: [false; 2],
            reconnections: [0; 2],
            hit_counts: [0; 2],
            finishing: false,
            disposed: false,
            timers,
            pending: HashMap::new(),
            inputs,
            rng: ChaCha8Rng::seed_from_u64(seed),
            outbound,
            sink,
        };

        let grace = lifecycle.config.start_grace;
        lifecycle.schedule(TimerKind::StartGrace, grace);
        info!(match_id = %lifecycle.info.id, "Match created, waiting for players");
        lifecycle
    }

    pub fn player_connected(&mut self, side: Side, now: u64) {
        if self.state == MatchState::Ended {
            debug!(match_id = %self.info.id, ?side, "Connect after match end ignored");
            return;
        }

        let was_ready = self.ready[side.index()];
        self.ready[side.index()] = true;
        self.cancel(TimerKind::ReconnectGrace(side));
        self.send(ServerMsg::GameJoined {
            match_id: self.info.id,
            side,
            scores: self.scores,
            match_type: self.info.match_type,
            tournament_id: self.info.tournament_id,
            is_final: self.info.is_final,
        });
        if let Some(snapshot) = self.truth.history().latest() {
            self.send(snapshot.to_message());
        }

        if was_ready {
            debug!(match_id = %self.info.id, ?side, "Duplicate connect");
            return;
        }
        info!(match_id = %self.info.id, ?side, "Player connected");

        if !self.ready.iter().all(|r| *r) {
            // The other side is away with no grace timer left to wait on.
            if self.state == MatchState::Waiting && self.opponent_unforgiven(side) {
                info!(
                    match_id = %self.info.id,
                    ?side,
                    "Opponent has no forgiveness left, match continues"
                );
                self.begin_play(now, "Opponent disconnected without forgiveness, match continues");
            }
            return;
        }

        self.cancel(TimerKind::StartGrace);
        self.reconnections[side.index()] += 1;

        if self.reconnections[side.index()] > self.config.reconnect_allowance {
            info!(
                match_id = %self.info.id,
                ?side,
                reconnections = self.reconnections[side.index()],
                "Reconnect allowance exhausted"
            );
            if self.state == MatchState::Waiting {
                self.resume(now);
                self.state = MatchState::Playing;
            }
            self.send(ServerMsg::GameStarted {
                timestamp: now,
                message: "Reconnected without forgiveness: disconnects no longer pause the match"
                    .to_string(),
            });
            return;
        }

        if self.state == MatchState::Waiting {
            self.begin_play(now, "Game started");
        }
    }

    pub fn player_disconnected(&mut self, side: Side, now: u64) {
        if self.state == MatchState::Ended {
            return;
        }
        if !self.ready[side.index()] {
            debug!(match_id = %self.info.id, ?side, "Disconnect for a side that was not connected");
            return;
        }
        self.ready[side.index()] = false;

        // Before the first start the start grace still covers this side; after
        // the cap the celebration timer ends the match anyway.
        if self.truth.started_at().is_none() || self.finishing {
            info!(match_id = %self.info.id, ?side, "Player disconnected");
            return;
        }

        let reconnections = self.reconnections[side.index()];
        if reconnections < self.config.reconnect_allowance {
            if self.state == MatchState::Playing {
                self.state = MatchState::Waiting;
                self.send(ServerMsg::GameStopped {
                    message: "Opponent disconnected, waiting for reconnection".to_string(),
                });
            }
            let grace = self.config.reconnect_grace;
            self.schedule(TimerKind::ReconnectGrace(side), grace);
            info!(match_id = %self.info.id, ?side, reconnections, "Player disconnected, match paused");
        } else {
            info!(
                match_id = %self.info.id,
                ?side,
                reconnections,
                at = now,
                "Player disconnected without forgiveness, match continues"
            );
        }
    }

    pub fn surrender(&mut self, side: Side, now: u64) {
        if self.state == MatchState::Ended {
            return;
        }
        info!(match_id = %self.info.id, ?side, "Player surrendered");
        self.end_game(EndReason::Surrender, Some(side.opponent()), now);
    }

    /// Handle a fired timer. Stale or superseded timers are ignored.
    pub fn on_timer(&mut self, kind: TimerKind, id: TimerId, now: u64) {
        if self.disposed || self.state == MatchState::Ended {
            debug!(match_id = %self.info.id, ?kind, "Timer fired after match end");
            return;
        }
        if self.pending.get(&kind) != Some(&id) {
            debug!(match_id = %self.info.id, ?kind, "Stale timer ignored");
            return;
        }
        self.pending.remove(&kind);
        self.timers.cancel(id);

        match kind {
            TimerKind::StartGrace => {
                if !self.ready.iter().all(|r| *r) {
                    warn!(match_id = %self.info.id, ready = ?self.ready, "Players never became ready");
                    self.end_game(EndReason::Disconnection, None, now);
                }
            }
            TimerKind::ReconnectGrace(side) => {
                if !self.ready[side.index()] {
                    warn!(match_id = %self.info.id, ?side, "Reconnect grace expired");
                    self.end_game(EndReason::Disconnection, None, now);
                }
            }
            TimerKind::Celebration => {
                self.end_game(EndReason::ScoreLimit, None, now);
            }
        }
    }

    /// Drive the stepper; called at the tick rate
    pub fn tick(&mut self, now: u64) {
        if self.state == MatchState::Ended {
            return;
        }
        // The cap applies while paused too.
        if self.truth.is_expired(now) {
            info!(match_id = %self.info.id, state = ?self.state, "Match duration cap reached");
            self.end_game(EndReason::Timeout, None, now);
            return;
        }
        if self.state != MatchState::Playing {
            return;
        }

        let mut events = Vec::new();
        let inputs = [&*self.inputs[0], &*self.inputs[1]];
        match self.truth.tick(now, &mut self.arena, inputs, &mut events) {
            TickOutcome::Idle => return,
            TickOutcome::Expired => {
                info!(match_id = %self.info.id, "Match duration cap reached");
                self.end_game(EndReason::Timeout, None, now);
                return;
            }
            TickOutcome::Stepped(snapshot) => self.send(snapshot.to_message()),
        }

        for event in events {
            match event {
                CollisionEvent::PaddleHit(side) => self.hit_counts[side.index()] += 1,
                CollisionEvent::Goal { scorer } => self.on_goal(scorer, now),
                CollisionEvent::Degenerate { side } => {
                    if !self.finishing {
                        warn!(match_id = %self.info.id, ?side, "Re-serving after degenerate contact");
                        let toward = self.random_side();
                        self.serve(toward, now);
                    }
                }
                CollisionEvent::TriggerCrossed { side, level } => {
                    trace!(match_id = %self.info.id, ?side, level, "Trigger crossed");
                }
                CollisionEvent::WallBounce => {}
            }
            if self.state == MatchState::Ended {
                break;
            }
        }
    }

    fn on_goal(&mut self, scorer: Side, now: u64) {
        if self.finishing {
            return;
        }

        let score = self.scores.get_mut(scorer);
        if *score < self.config.win_score {
            *score += 1;
        }
        info!(
            match_id = %self.info.id,
            ?scorer,
            p1 = self.scores.p1,
            p2 = self.scores.p2,
            "Goal"
        );

        self.send(ServerMsg::Score {
            scoring_side: scorer,
            scores: self.scores,
        });
        self.sink.publish(MatchEvent::ScoreUpdated {
            match_id: self.info.id,
            score1: self.scores.p1,
            score2: self.scores.p2,
            timestamp: Utc::now(),
        });

        let win = self.config.win_score;
        if self.scores.p1 >= win || self.scores.p2 >= win {
            self.finishing = true;
            self.arena.ball.halt();
            if self.info.is_final || self.config.celebration_delay.is_zero() {
                self.end_game(EndReason::ScoreLimit, None, now);
            } else {
                let delay = self.config.celebration_delay;
                self.schedule(TimerKind::Celebration, delay);
            }
        } else {
            self.serve(scorer.opponent(), now);
        }
    }

    /// Single exit path; emits exactly one finished event
    pub fn end_game(&mut self, reason: EndReason, explicit_winner: Option<Side>, now: u64) {
        if self.state == MatchState::Ended {
            debug!(match_id = %self.info.id, ?reason, "Match already ended");
            return;
        }
        self.state = MatchState::Ended;

        let coin = if self.rng.gen_bool(0.5) {
            Side::P1
        } else {
            Side::P2
        };
        let winner = decide_winner(
            reason,
            explicit_winner,
            self.scores,
            self.ready,
            self.config.win_score,
            || coin,
        );
        let winner_id = self.info.player(winner);

        info!(
            match_id = %self.info.id,
            ?reason,
            ?winner,
            p1 = self.scores.p1,
            p2 = self.scores.p2,
            at = now,
            "Match ended"
        );

        self.send(ServerMsg::GameEnded {
            winner_id,
            scores: self.scores,
            reason,
            match_type: self.info.match_type,
            tournament_id: self.info.tournament_id,
        });
        self.sink.publish(MatchEvent::MatchFinished {
            match_id: self.info.id,
            player1_id: self.info.players[0],
            player2_id: self.info.players[1],
            score1: self.scores.p1,
            score2: self.scores.p2,
            winner_id,
            reason,
            hit_counts: self.hit_counts,
            is_tournament_final: self.info.is_final,
            timestamp: Utc::now(),
        });

        self.dispose();
    }

    /// Cancel every timer and release buffered state. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        for (_, id) in self.pending.drain() {
            self.timers.cancel(id);
        }
        self.arena.ball.halt();
        for history in &self.inputs {
            history.clear();
        }
        self.truth.clear();
        debug!(match_id = %self.info.id, "Match disposed");
    }

    /// Start, or resume after a pause, and serve toward a random side
    fn begin_play(&mut self, now: u64, message: &str) {
        if self.truth.started_at().is_some() {
            self.resume(now);
        } else {
            self.truth.start(now);
        }
        self.state = MatchState::Playing;
        self.send(ServerMsg::GameStarted {
            timestamp: now,
            message: message.to_string(),
        });
        let toward = self.random_side();
        self.serve(toward, now);
        info!(match_id = %self.info.id, "Match playing");
    }

    /// Opponent of `side` is away, play has begun, and no reconnect grace covers it
    fn opponent_unforgiven(&self, side: Side) -> bool {
        let opponent = side.opponent();
        !self.ready[opponent.index()]
            && self.truth.started_at().is_some()
            && !self.finishing
            && !self
                .pending
                .contains_key(&TimerKind::ReconnectGrace(opponent))
    }

    fn serve(&mut self, toward: Side, now: u64) {
        let max = self.arena.params.serve_max_angle;
        let angle = if max > 0.0 {
            self.rng.gen_range(-max..=max)
        } else {
            0.0
        };
        let (resume_at, direction) = self.arena.serve(now, toward, angle);
        self.send(ServerMsg::GenerateBall {
            timestamp: resume_at,
            direction: direction.to_array(),
        });
    }

    fn random_side(&mut self) -> Side {
        if self.rng.gen_bool(0.5) {
            Side::P1
        } else {
            Side::P2
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        let id = self.timers.schedule(delay, kind);
        self.pending.insert(kind, id);
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(id) = self.pending.remove(&kind) {
            self.timers.cancel(id);
        }
    }

    fn resume(&mut self, now: u64) {
        let inputs = [&*self.inputs[0], &*self.inputs[1]];
        self.truth.resume(now, &mut self.arena, inputs);
    }

    fn send(&self, msg: ServerMsg) {
        // No receivers just means nobody is listening right now.
        let _ = self.outbound.send(msg);
    }

    pub fn info(&self) -> &MatchInfo {
        &self.info
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state == MatchState::Ended
    }

    pub fn scores(&self) -> Scores {
        self.scores
    }

    #[cfg(test)]
    pub fn reconnections(&self, side: Side) -> u32 {
        self.reconnections[side.index()]
    }

    pub fn hit_counts(&self) -> [u32; 2] {
        self.hit_counts
    }

    #[cfg(test)]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn truth(&self) -> &TruthManager {
        &self.truth
    }

    #[cfg(test)]
    pub fn timers(&self) -> &T {
        &self.timers
    }
}
