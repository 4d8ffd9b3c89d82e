//! Time utilities for the match simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 30;
pub const TICK_DURATION_MS: u64 = 1_000 / SIMULATION_TPS as u64;

/// Millisecond clock for one match.
///
/// Reads wall-clock milliseconds at creation and advances with tokio's
/// monotonic clock afterwards, so it never jumps backwards and follows
/// paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct MatchClock {
    origin: tokio::time::Instant,
    origin_ms: u64,
}

impl MatchClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            origin_ms: unix_millis(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }
}

impl Default for MatchClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn match_clock_follows_tokio_time() {
        let clock = MatchClock::new();
        let start = clock.now_ms();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms() - start, 250);
    }

    #[test]
    fn tick_duration_matches_rate() {
        assert_eq!(TICK_DURATION_MS, 33);
    }
}
