//! Match simulation and lifecycle

pub mod entities;
pub mod events;
pub mod geometry;
pub mod input;
pub mod lifecycle;
pub mod r#match;
pub mod physics;
pub mod registry;
pub mod snapshot;
pub mod timers;
pub mod truth;

pub use events::{BroadcastEventSink, MatchEvent};
pub use lifecycle::LifecycleConfig;
pub use r#match::{MatchCommand, MatchHandle};
pub use registry::{MatchRegistry, NewMatch, RegistryError};
