//! Core types shared by the broadcasting client and the gap engine
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod config;
pub mod context;
pub mod error;
pub mod serde;
pub mod types;

pub use self::config::{BroadcastingSettings, ClientConfig, EngineConfig, GapPolicy, RankingOrder, RetryPolicy};
pub use self::context::{SessionContext, TimingStats, Timings};
pub use self::error::{Error, Result};
pub use self::types::{AccClassifier, CarClass, Classifier, TeamCupCategory, TrackId};

/// Broadcasting protocol version spoken by this client
pub const PROTOCOL_VERSION: u8 = 4;

/// Default simulator broadcasting port
pub const DEFAULT_PORT: u16 = 9000;

/// Maximum datagram size in bytes
pub const MAX_PACKET_SIZE: usize = 65507;
