//! Broadcasting protocol module
//!
//! This module defines the broadcasting protocol messages, their wire
//! encoding, and the connection state machine.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::FrameCodec;
pub use self::message::{
    BroadcastingEvent, BroadcastingEventType, CameraSelection, CameraSet, CarInfo, CarLocation, Command,
    DriverCategory, DriverInfo, EntryList, InboundMessage, LapRecord, LapType, OutboundMessage,
    RealtimeCarUpdate, RegistrationResult, ReplayState, SessionPhase, SessionType, SessionUpdate, TrackData,
};
pub use self::state::{BroadcastEvent, ConnectionState, ProtocolState, StateInfo};

/// Lap and split times equal to this value were not recorded
pub const NO_TIME: i32 = i32::MAX;

/// Splits reported per lap
pub const MAX_SPLITS: usize = 3;

/// Connection id before registration succeeds
pub const UNREGISTERED: i32 = -1;

/// Inbound message type bytes
pub mod inbound {
    pub const REGISTRATION_RESULT: u8 = 1;
    pub const REALTIME_UPDATE: u8 = 2;
    pub const REALTIME_CAR_UPDATE: u8 = 3;
    pub const ENTRY_LIST: u8 = 4;
    pub const TRACK_DATA: u8 = 5;
    pub const ENTRY_LIST_CAR: u8 = 6;
    pub const BROADCASTING_EVENT: u8 = 7;
}

/// Outbound message type bytes
pub mod outbound {
    pub const REGISTER_COMMAND_APPLICATION: u8 = 1;
    pub const UNREGISTER_COMMAND_APPLICATION: u8 = 9;
    pub const REQUEST_ENTRY_LIST: u8 = 10;
    pub const REQUEST_TRACK_DATA: u8 = 11;
    pub const CHANGE_HUD_PAGE: u8 = 49;
    pub const CHANGE_FOCUS: u8 = 50;
    pub const INSTANT_REPLAY_REQUEST: u8 = 51;
}
