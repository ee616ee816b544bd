use serde::{Deserialize, Serialize};

use crate::core::TrackId;

/// Declares a byte-valued wire enum with an `Unknown` fallback
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)+
            Unknown(u8),
        }

        impl From<u8> for $name {
            fn from(raw: u8) -> Self {
                match raw {
                    $($value => $name::$variant,)+
                    other => $name::Unknown(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                match value {
                    $($name::$variant => $value,)+
                    $name::Unknown(raw) => raw,
                }
            }
        }
    };
}

wire_enum! {
    /// Kind of session running on the server
    pub enum SessionType {
        Practice = 0,
        Qualifying = 4,
        Superpole = 9,
        Race = 10,
        Hotlap = 11,
        Hotstint = 12,
        HotlapSuperpole = 13,
        Replay = 14,
    }
}

wire_enum! {
    /// Phase within the current session
    pub enum SessionPhase {
        None = 0,
        Starting = 1,
        PreFormation = 2,
        FormationLap = 3,
        PreSession = 4,
        Session = 5,
        SessionOver = 6,
        PostSession = 7,
        ResultUi = 8,
    }
}

wire_enum! {
    /// Where a car currently is
    pub enum CarLocation {
        None = 0,
        Track = 1,
        Pitlane = 2,
        PitEntry = 3,
        PitExit = 4,
    }
}

wire_enum! {
    /// Broadcasting event kinds
    pub enum BroadcastingEventType {
        None = 0,
        GreenFlag = 1,
        SessionOver = 2,
        PenaltyCommMsg = 3,
        Accident = 4,
        LapCompleted = 5,
        BestSessionLap = 6,
        BestPersonalLap = 7,
    }
}

wire_enum! {
    /// Driver rating category
    pub enum DriverCategory {
        Bronze = 0,
        Silver = 1,
        Gold = 2,
        Platinum = 3,
    }
}

impl SessionType {
    /// Whether gaps are measured on track rather than by best lap
    pub fn is_race(&self) -> bool {
        matches!(self, SessionType::Race)
    }
}

/// Regular, out or in lap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LapType {
    Regular,
    Outlap,
    Inlap,
}

/// A completed or running lap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    /// Lap time, absent when the simulator has none recorded
    pub lap_time_ms: Option<i32>,
    pub car_id: u16,
    pub driver_index: u16,
    /// Sector splits, at most three
    pub splits_ms: Vec<Option<i32>>,
    pub is_invalid: bool,
    pub is_valid_for_best: bool,
    pub lap_type: LapType,
}

impl LapRecord {
    /// Lap time in seconds
    pub fn lap_time_secs(&self) -> Option<f64> {
        self.lap_time_ms.map(crate::util::ms_to_secs)
    }
}

impl Default for LapRecord {
    fn default() -> Self {
        LapRecord {
            lap_time_ms: None,
            car_id: 0,
            driver_index: 0,
            splits_ms: Vec::new(),
            is_invalid: false,
            is_valid_for_best: true,
            lap_type: LapType::Regular,
        }
    }
}

/// Result of a registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub connection_id: i32,
    pub success: bool,
    pub readonly: bool,
    pub error_message: String,
}

/// Replay state of a session update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayState {
    pub session_time_ms: f32,
    pub remaining_ms: f32,
}

/// Session-wide realtime update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub event_index: u16,
    pub session_index: u16,
    pub session_type: SessionType,
    pub phase: SessionPhase,
    pub session_time_ms: f32,
    pub session_end_time_ms: f32,
    pub focused_car_index: i32,
    pub active_camera_set: String,
    pub active_camera: String,
    pub current_hud_page: String,
    pub replay: Option<ReplayState>,
    /// Seconds since midnight
    pub time_of_day_secs: f32,
    pub ambient_temp: u8,
    pub track_temp: u8,
    pub clouds: f32,
    pub rain_level: f32,
    pub wetness: f32,
    pub best_session_lap: LapRecord,
}

/// Per-car realtime update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeCarUpdate {
    pub car_id: u16,
    pub driver_index: u16,
    pub driver_count: u8,
    /// -1 reverse, 0 neutral
    pub gear: i8,
    pub world_pos_x: f32,
    pub world_pos_y: f32,
    pub yaw: f32,
    pub location: CarLocation,
    pub speed_kmh: u16,
    pub position: u16,
    pub cup_position: u16,
    pub track_position: u16,
    /// Normalized into `[0, 1)` with the track offset applied
    pub spline_position: f64,
    pub laps: u16,
    pub delta_ms: i32,
    pub best_session_lap: LapRecord,
    pub last_lap: LapRecord,
    pub current_lap: LapRecord,
}

/// Driver of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub first_name: String,
    pub last_name: String,
    pub short_name: String,
    pub category: DriverCategory,
    pub nationality: u16,
}

/// Full description of one entry list car
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarInfo {
    pub car_id: u16,
    pub car_model: u8,
    pub team_name: String,
    pub race_number: i32,
    pub cup_category: u8,
    pub current_driver_index: u8,
    pub nationality: u16,
    pub drivers: Vec<DriverInfo>,
}

/// Header of a new entry list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryList {
    pub connection_id: i32,
    pub car_ids: Vec<u16>,
}

/// Named camera set and its cameras
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSet {
    pub name: String,
    pub cameras: Vec<String>,
}

/// Static information about the current track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackData {
    pub connection_id: i32,
    pub track_name: String,
    pub track_id: TrackId,
    pub track_meters: i32,
    pub camera_sets: Vec<CameraSet>,
    pub hud_pages: Vec<String>,
}

/// Flag, penalty or incident notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastingEvent {
    pub event_type: BroadcastingEventType,
    pub message: String,
    pub time_ms: i32,
    pub car_id: i32,
}

/// Messages sent by the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InboundMessage {
    RegistrationResult(RegistrationResult),
    RealtimeUpdate(SessionUpdate),
    RealtimeCarUpdate(RealtimeCarUpdate),
    EntryList(EntryList),
    TrackData(TrackData),
    EntryListCar(CarInfo),
    BroadcastingEvent(BroadcastingEvent),
}

impl InboundMessage {
    /// Wire message type byte
    pub fn message_type(&self) -> u8 {
        use super::inbound::*;
        match self {
            InboundMessage::RegistrationResult(_) => REGISTRATION_RESULT,
            InboundMessage::RealtimeUpdate(_) => REALTIME_UPDATE,
            InboundMessage::RealtimeCarUpdate(_) => REALTIME_CAR_UPDATE,
            InboundMessage::EntryList(_) => ENTRY_LIST,
            InboundMessage::TrackData(_) => TRACK_DATA,
            InboundMessage::EntryListCar(_) => ENTRY_LIST_CAR,
            InboundMessage::BroadcastingEvent(_) => BROADCASTING_EVENT,
        }
    }
}

/// Camera selection for a focus change or replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSelection {
    pub camera_set: String,
    pub camera: String,
}

/// Messages sent to the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundMessage {
    Register {
        display_name: String,
        connection_password: String,
        update_interval_ms: i32,
        command_password: String,
    },
    Unregister {
        connection_id: i32,
    },
    RequestEntryList {
        connection_id: i32,
    },
    RequestTrackData {
        connection_id: i32,
    },
    ChangeHudPage {
        connection_id: i32,
        hud_page: String,
    },
    ChangeFocus {
        connection_id: i32,
        car_index: Option<u16>,
        camera: Option<CameraSelection>,
    },
    InstantReplay {
        connection_id: i32,
        start_session_time_ms: f32,
        duration_ms: f32,
        focused_car_index: i32,
        camera: CameraSelection,
    },
}

impl OutboundMessage {
    /// Wire message type byte
    pub fn message_type(&self) -> u8 {
        use super::outbound::*;
        match self {
            OutboundMessage::Register { .. } => REGISTER_COMMAND_APPLICATION,
            OutboundMessage::Unregister { .. } => UNREGISTER_COMMAND_APPLICATION,
            OutboundMessage::RequestEntryList { .. } => REQUEST_ENTRY_LIST,
            OutboundMessage::RequestTrackData { .. } => REQUEST_TRACK_DATA,
            OutboundMessage::ChangeHudPage { .. } => CHANGE_HUD_PAGE,
            OutboundMessage::ChangeFocus { .. } => CHANGE_FOCUS,
            OutboundMessage::InstantReplay { .. } => INSTANT_REPLAY_REQUEST,
        }
    }
}

/// Commands a caller may issue on an established connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    RequestEntryList,
    RequestTrackData,
    ChangeHudPage(String),
    ChangeFocus {
        car_index: Option<u16>,
        camera: Option<CameraSelection>,
    },
    InstantReplay {
        start_session_time_ms: f32,
        duration_ms: f32,
        focused_car_index: i32,
        camera: CameraSelection,
    },
}

impl Command {
    /// Binds the command to a connection
    pub fn into_message(self, connection_id: i32) -> OutboundMessage {
        match self {
            Command::RequestEntryList => OutboundMessage::RequestEntryList { connection_id },
            Command::RequestTrackData => OutboundMessage::RequestTrackData { connection_id },
            Command::ChangeHudPage(hud_page) => OutboundMessage::ChangeHudPage { connection_id, hud_page },
            Command::ChangeFocus { car_index, camera } => OutboundMessage::ChangeFocus {
                connection_id,
                car_index,
                camera,
            },
            Command::InstantReplay {
                start_session_time_ms,
                duration_ms,
                focused_car_index,
                camera,
            } => OutboundMessage::InstantReplay {
                connection_id,
                start_session_time_ms,
                duration_ms,
                focused_car_index,
                camera,
            },
        }
    }
}
