//! Rate limiting for client messages

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified messages per second
pub fn create_limiter(per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Paddle input messages per second per connection
pub const INPUT_RATE_LIMIT: u32 = 60;

/// Limits for one socket connection
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    input_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            input_limiter: create_limiter(per_second),
        }
    }

    /// Returns true if another input message is allowed right now
    pub fn check_input(&self) -> bool {
        self.input_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new(INPUT_RATE_LIMIT)
    }
}
