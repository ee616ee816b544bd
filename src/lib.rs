//! ACC Leaderboard: broadcasting client and live gap engine
//!
//! This library speaks the simulator's UDP broadcasting protocol, keeps the
//! session roster in sync, and turns the realtime car updates into ranked
//! leaderboards with time gaps between cars.
pub mod core;
pub mod gaps;
pub mod network;
pub mod protocol;
pub mod track;
pub mod util;

// Re-export commonly used items
pub use crate::core::{ClientConfig, EngineConfig, Error, Result, SessionContext};
pub use crate::gaps::{Gap, GapResult, LeaderboardEngine, LeaderboardEntry, LeaderboardSnapshot};
pub use crate::network::BroadcastClient;
pub use crate::protocol::{BroadcastEvent, Command};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
