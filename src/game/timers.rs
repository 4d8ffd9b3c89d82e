//! Cancellable timers for match lifecycle deadlines

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ws::protocol::Side;

/// The concern a timer belongs to. At most one timer per kind is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Both sides must be ready before this fires
    StartGrace,
    /// A disconnected side must be back before this fires
    ReconnectGrace(Side),
    /// Pause between reaching the score cap and ending the match
    Celebration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Delivered when a timer elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub id: TimerId,
}

/// Capability to schedule and cancel one-shot timers
pub trait TimerService: Send {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId;

    /// Canceling an unknown or already fired timer is a no-op
    fn cancel(&mut self, id: TimerId);
}

/// Timers backed by tokio sleeps; firings arrive on the receiver returned by `new`.
pub struct TokioTimers {
    next_id: u64,
    tx: mpsc::UnboundedSender<TimerFired>,
    tasks: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                next_id: 0,
                tx,
                tasks: HashMap::new(),
            },
            rx,
        )
    }
}

impl TimerService for TokioTimers {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let tx = self.tx.clone();

        self.tasks.retain(|_, task| !task.is_finished());
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired { kind, id });
        });
        self.tasks.insert(id, task);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Timer double that only records; tests fire timers by hand.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualTimers {
    next_id: u64,
    pending: HashMap<TimerId, (TimerKind, Duration)>,
}

#[cfg(test)]
impl ManualTimers {
    /// Live timer of the given kind
    pub fn pending(&self, kind: TimerKind) -> Option<(TimerId, Duration)> {
        self.pending
            .iter()
            .find(|(_, (k, _))| *k == kind)
            .map(|(id, (_, delay))| (*id, *delay))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
impl TimerService for ManualTimers {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.pending.insert(id, (kind, delay));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.pending.remove(&id);
    }
}
