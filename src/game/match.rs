//! Match task and the handle used to talk to it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::MatchClock;
use crate::ws::protocol::{ServerMsg, Side};

use super::events::EventSink;
use super::input::{InputError, InputHistory, InputSample};
use super::lifecycle::{LifecycleConfig, MatchInfo, MatchLifecycle};
use super::timers::{TimerFired, TokioTimers};

/// Connection-level commands forwarded to the match task.
///
/// `socket` is the generation handed out by [`MatchHandle::open_socket`];
/// a disconnect from a socket that has since been replaced is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCommand {
    Connected { side: Side, socket: u64 },
    Disconnected { side: Side, socket: u64 },
    Surrender(Side),
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub info: Arc<MatchInfo>,
    pub command_tx: mpsc::Sender<MatchCommand>,
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    inputs: [Arc<InputHistory>; 2],
    sockets: Arc<[AtomicU64; 2]>,
    clock: MatchClock,
}

impl MatchHandle {
    pub fn id(&self) -> Uuid {
        self.info.id
    }

    pub fn side_of(&self, player_id: Uuid) -> Option<Side> {
        self.info.side_of(player_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.snapshot_tx.subscribe()
    }

    /// Forward a command; false if the match task is gone
    pub async fn send(&self, command: MatchCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }

    /// Match clock, unix milliseconds
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Next socket generation for `side`; the newest socket owns the side
    pub fn open_socket(&self, side: Side) -> u64 {
        self.sockets[side.index()].fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Buffer a direction change at the client's timestamp.
    ///
    /// Client timestamps are match-clock milliseconds, capped at the receive
    /// time; without one the receive time is used. Samples for instants
    /// already simulated are rejected as stale.
    pub fn record_input(
        &self,
        side: Side,
        direction: i8,
        client_timestamp: Option<u64>,
    ) -> Result<(), InputError> {
        let received = self.now_ms();
        let timestamp = client_timestamp.map_or(received, |t| t.min(received));
        self.inputs[side.index()].append(InputSample::new(timestamp, direction))
    }
}

impl std::fmt::Debug for MatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchHandle")
            .field("id", &self.info.id)
            .field("players", &self.info.players)
            .finish_non_exhaustive()
    }
}

/// The authoritative match task
pub struct GameMatch {
    lifecycle: MatchLifecycle<TokioTimers>,
    command_rx: mpsc::Receiver<MatchCommand>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    clock: MatchClock,
    tick: Duration,
    /// Generation of the socket currently holding each side
    sockets: [u64; 2],
}

impl GameMatch {
    /// Create a new match. Must be called inside a tokio runtime.
    pub fn new(
        info: MatchInfo,
        config: LifecycleConfig,
        sink: Arc<dyn EventSink>,
        seed: u64,
    ) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (snapshot_tx, _) = broadcast::channel(256);
        let (timers, timer_rx) = TokioTimers::new();
        let inputs = [Arc::new(InputHistory::new()), Arc::new(InputHistory::new())];
        let clock = MatchClock::new();
        let tick = Duration::from_millis(config.truth.tick_ms.max(1));

        let handle = MatchHandle {
            info: Arc::new(info.clone()),
            command_tx,
            snapshot_tx: snapshot_tx.clone(),
            inputs: inputs.clone(),
            sockets: Arc::new([AtomicU64::new(0), AtomicU64::new(0)]),
            clock,
        };

        let lifecycle = MatchLifecycle::new(
            info,
            config,
            timers,
            inputs,
            snapshot_tx,
            sink,
            seed,
            clock.now_ms(),
        );

        let game_match = Self {
            lifecycle,
            command_rx,
            timer_rx,
            clock,
            tick,
            sockets: [0; 2],
        };

        (game_match, handle)
    }

    /// Run until the lifecycle reaches its terminal state
    pub async fn run(mut self) {
        let match_id = self.lifecycle.info().id;
        info!(match_id = %match_id, "Match task started");

        let mut tick_interval = interval(self.tick);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.lifecycle.tick(self.clock.now_ms());
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }
                Some(fired) = self.timer_rx.recv() => {
                    self.lifecycle.on_timer(fired.kind, fired.id, self.clock.now_ms());
                }
            }

            if self.lifecycle.is_ended() {
                break;
            }
        }

        let scores = self.lifecycle.scores();
        info!(
            match_id = %match_id,
            ticks = self.lifecycle.truth().tick_count(),
            p1 = scores.p1,
            p2 = scores.p2,
            hits = ?self.lifecycle.hit_counts(),
            "Match task finished"
        );
    }

    fn handle_command(&mut self, command: MatchCommand) {
        let now = self.clock.now_ms();
        let match_id = self.lifecycle.info().id;
        debug!(match_id = %match_id, ?command, state = ?self.lifecycle.state(), "Match command");
        match command {
            MatchCommand::Connected { side, socket } => {
                let current = &mut self.sockets[side.index()];
                *current = (*current).max(socket);
                self.lifecycle.player_connected(side, now);
            }
            MatchCommand::Disconnected { side, socket } => {
                if socket != self.sockets[side.index()] {
                    debug!(match_id = %match_id, ?side, socket, "Replaced socket closed");
                    return;
                }
                self.lifecycle.player_disconnected(side, now);
            }
            MatchCommand::Surrender(side) => self.lifecycle.surrender(side, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::{MatchEvent, RecordingSink};
    use crate::ws::protocol::{EndReason, MatchType};

    fn spawn_match(sink: Arc<RecordingSink>) -> (MatchHandle, tokio::task::JoinHandle<()>) {
        let info = MatchInfo {
            id: Uuid::new_v4(),
            players: [Uuid::new_v4(), Uuid::new_v4()],
            match_type: MatchType::Quick,
            tournament_id: None,
            is_final: false,
        };
        let (game_match, handle) = GameMatch::new(info, LifecycleConfig::default(), sink, 42);
        let task = tokio::spawn(game_match.run());
        (handle, task)
    }

    async fn connect(handle: &MatchHandle, side: Side) -> u64 {
        let socket = handle.open_socket(side);
        assert!(handle.send(MatchCommand::Connected { side, socket }).await);
        socket
    }

    fn last_update(messages: &[ServerMsg]) -> Option<(i8, i8)> {
        messages.iter().rev().find_map(|m| match m {
            ServerMsg::GameUpdate { p1, p2, .. } => Some((p1.dir, p2.dir)),
            _ => None,
        })
    }

    fn drain(rx: &mut broadcast::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn connected_match_streams_updates_until_surrender() {
        let sink = Arc::new(RecordingSink::default());
        let (handle, task) = spawn_match(sink.clone());
        let mut rx = handle.subscribe();

        connect(&handle, Side::P1).await;
        connect(&handle, Side::P2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.record_input(Side::P1, 1, None).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let messages = drain(&mut rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMsg::GameStarted { .. })));
        let updates = messages
            .iter()
            .filter(|m| matches!(m, ServerMsg::GameUpdate { .. }))
            .count();
        assert!(updates >= 10, "only {} updates", updates);
        let p1_moving = messages.iter().rev().find_map(|m| match m {
            ServerMsg::GameUpdate { p1, .. } => Some(p1.dir),
            _ => None,
        });
        assert_eq!(p1_moving, Some(1));

        assert!(handle.send(MatchCommand::Surrender(Side::P1)).await);
        task.await.unwrap();

        let finished = sink.finished();
        assert_eq!(finished.len(), 1);
        match &finished[0] {
            MatchEvent::MatchFinished {
                winner_id, reason, ..
            } => {
                assert_eq!(*reason, EndReason::Surrender);
                assert_eq!(*winner_id, handle.info.player(Side::P2));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unattended_match_ends_after_start_grace() {
        let sink = Arc::new(RecordingSink::default());
        let (_handle, task) = spawn_match(sink.clone());

        let result = tokio::time::timeout(Duration::from_secs(30), task).await;
        assert!(result.is_ok(), "match should end on its own");
        match &sink.finished()[0] {
            MatchEvent::MatchFinished { reason, .. } => {
                assert_eq!(*reason, EndReason::Disconnection)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handle_resolves_player_sides() {
        let (handle, _task) = spawn_match(Arc::new(RecordingSink::default()));
        let p2 = handle.info.players[1];
        assert_eq!(handle.side_of(p2), Some(Side::P2));
        assert_eq!(handle.side_of(Uuid::new_v4()), None);
        assert!(handle.record_input(Side::P2, 2, None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_socket_closing_does_not_pause() {
        let (handle, _task) = spawn_match(Arc::new(RecordingSink::default()));
        let mut rx = handle.subscribe();

        let first = connect(&handle, Side::P1).await;
        connect(&handle, Side::P2).await;
        let second = connect(&handle, Side::P1).await;
        assert!(second > first);

        handle
            .send(MatchCommand::Disconnected {
                side: Side::P1,
                socket: first,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMsg::GameStopped { .. })));

        handle
            .send(MatchCommand::Disconnected {
                side: Side::P1,
                socket: second,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMsg::GameStopped { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn late_client_input_is_ignored_and_future_input_is_capped() {
        let (handle, _task) = spawn_match(Arc::new(RecordingSink::default()));
        let mut rx = handle.subscribe();
        connect(&handle, Side::P1).await;
        connect(&handle, Side::P2).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let late = handle.now_ms() - 400;
        assert!(matches!(
            handle.record_input(Side::P1, 1, Some(late)),
            Err(InputError::Stale { .. })
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(last_update(&drain(&mut rx)), Some((0, 0)));

        let ahead = handle.now_ms() + 10_000;
        handle.record_input(Side::P2, -1, Some(ahead)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(last_update(&drain(&mut rx)), Some((0, -1)));
    }
}
