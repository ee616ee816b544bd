use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, Result, TrackId};
use crate::util::normalize_spline;
use super::message::*;
use super::{inbound, MAX_SPLITS, NO_TIME};

/// Codec for broadcasting datagrams
///
/// Each datagram holds exactly one message, so decoding consumes the whole
/// buffer. Car updates get the track's spline offset applied while decoding.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    spline_offset: f64,
}

impl FrameCodec {
    /// Creates a new codec without spline offset
    pub fn new() -> Self {
        FrameCodec::default()
    }

    /// Creates a codec normalizing spline positions with `offset`
    pub fn with_spline_offset(offset: f64) -> Self {
        FrameCodec { spline_offset: offset }
    }

    /// Offset added to every decoded spline position
    pub fn spline_offset(&self) -> f64 {
        self.spline_offset
    }

    /// Sets the offset used for subsequent car updates
    pub fn set_spline_offset(&mut self, offset: f64) {
        self.spline_offset = offset;
    }

    /// Decodes one inbound datagram
    pub fn decode_frame(&self, frame: &[u8]) -> Result<InboundMessage> {
        let mut reader = FrameReader::new(frame);
        let message_type = reader.u8()?;

        let message = match message_type {
            inbound::REGISTRATION_RESULT => InboundMessage::RegistrationResult(read_registration(&mut reader)?),
            inbound::REALTIME_UPDATE => InboundMessage::RealtimeUpdate(read_session_update(&mut reader)?),
            inbound::REALTIME_CAR_UPDATE => {
                InboundMessage::RealtimeCarUpdate(read_car_update(&mut reader, self.spline_offset)?)
            }
            inbound::ENTRY_LIST => InboundMessage::EntryList(read_entry_list(&mut reader)?),
            inbound::TRACK_DATA => InboundMessage::TrackData(read_track_data(&mut reader)?),
            inbound::ENTRY_LIST_CAR => InboundMessage::EntryListCar(read_car_info(&mut reader)?),
            inbound::BROADCASTING_EVENT => InboundMessage::BroadcastingEvent(read_event(&mut reader)?),
            other => return Err(Error::UnknownMessageType(other)),
        };

        Ok(message)
    }

    /// Encodes one outbound message into `dst`
    pub fn encode_message(&self, message: &OutboundMessage, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(message.message_type());
        match message {
            OutboundMessage::Register {
                display_name,
                connection_password,
                update_interval_ms,
                command_password,
            } => {
                dst.put_u8(crate::core::PROTOCOL_VERSION);
                put_string(dst, display_name)?;
                put_string(dst, connection_password)?;
                dst.put_i32_le(*update_interval_ms);
                put_string(dst, command_password)?;
            }
            OutboundMessage::Unregister { connection_id }
            | OutboundMessage::RequestEntryList { connection_id }
            | OutboundMessage::RequestTrackData { connection_id } => {
                dst.put_i32_le(*connection_id);
            }
            OutboundMessage::ChangeHudPage { connection_id, hud_page } => {
                dst.put_i32_le(*connection_id);
                put_string(dst, hud_page)?;
            }
            OutboundMessage::ChangeFocus {
                connection_id,
                car_index,
                camera,
            } => {
                dst.put_i32_le(*connection_id);
                match car_index {
                    Some(index) => {
                        dst.put_u8(1);
                        dst.put_u16_le(*index);
                    }
                    None => dst.put_u8(0),
                }
                match camera {
                    Some(selection) if !selection.camera_set.is_empty() && !selection.camera.is_empty() => {
                        dst.put_u8(1);
                        put_string(dst, &selection.camera_set)?;
                        put_string(dst, &selection.camera)?;
                    }
                    _ => dst.put_u8(0),
                }
            }
            OutboundMessage::InstantReplay {
                connection_id,
                start_session_time_ms,
                duration_ms,
                focused_car_index,
                camera,
            } => {
                dst.put_i32_le(*connection_id);
                dst.put_f32_le(*start_session_time_ms);
                dst.put_f32_le(*duration_ms);
                dst.put_i32_le(*focused_car_index);
                put_string(dst, &camera.camera_set)?;
                put_string(dst, &camera.camera)?;
            }
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = InboundMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }

        // One datagram is one frame; drop it whether or not it parses
        let frame = src.split();
        self.decode_frame(&frame).map(Some)
    }
}

impl Encoder<OutboundMessage> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: OutboundMessage, dst: &mut BytesMut) -> Result<()> {
        self.encode_message(&item, dst)
    }
}

/// Bounds-checked little-endian reader over one frame
struct FrameReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> FrameReader<'a> {
    fn new(frame: &'a [u8]) -> Self {
        FrameReader {
            buf: frame,
            len: frame.len(),
        }
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(Error::TruncatedFrame {
                needed,
                offset: self.len - self.buf.remaining(),
                len: self.len,
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn flag(&mut self) -> Result<bool> {
        Ok(self.u8()? > 0)
    }

    fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    fn i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    fn f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    /// Time in ms where `i32::MAX` marks a missing value
    fn time_ms(&mut self) -> Result<Option<i32>> {
        let raw = self.i32()?;
        Ok((raw != NO_TIME).then_some(raw))
    }

    fn string(&mut self) -> Result<String> {
        let len = usize::from(self.u16()?);
        self.ensure(len)?;
        let (raw, rest) = self.buf.split_at(len);
        self.buf = rest;
        String::from_utf8(raw.to_vec()).map_err(|e| Error::InvalidString(e.to_string()))
    }
}

fn put_string(dst: &mut BytesMut, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::protocol(format!("string of {} bytes exceeds u16 length", value.len())))?;
    dst.put_u16_le(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

fn read_registration(reader: &mut FrameReader<'_>) -> Result<RegistrationResult> {
    Ok(RegistrationResult {
        connection_id: reader.i32()?,
        success: reader.flag()?,
        readonly: reader.u8()? == 0,
        error_message: reader.string()?,
    })
}

fn read_lap(reader: &mut FrameReader<'_>) -> Result<LapRecord> {
    let lap_time_ms = reader.time_ms()?;
    let car_id = reader.u16()?;
    let driver_index = reader.u16()?;

    let split_count = reader.u8()?;
    let mut splits_ms = Vec::with_capacity(usize::from(split_count).max(MAX_SPLITS));
    for _ in 0..split_count {
        splits_ms.push(reader.time_ms()?);
    }
    while splits_ms.len() < MAX_SPLITS {
        splits_ms.push(None);
    }

    let is_invalid = reader.flag()?;
    let is_valid_for_best = reader.flag()?;
    let is_outlap = reader.flag()?;
    let is_inlap = reader.flag()?;

    let lap_type = if is_outlap {
        LapType::Outlap
    } else if is_inlap {
        LapType::Inlap
    } else {
        LapType::Regular
    };

    Ok(LapRecord {
        lap_time_ms,
        car_id,
        driver_index,
        splits_ms,
        is_invalid,
        is_valid_for_best,
        lap_type,
    })
}

fn read_session_update(reader: &mut FrameReader<'_>) -> Result<SessionUpdate> {
    let event_index = reader.u16()?;
    let session_index = reader.u16()?;
    let session_type = SessionType::from(reader.u8()?);
    let phase = SessionPhase::from(reader.u8()?);
    let session_time_ms = reader.f32()?;
    let session_end_time_ms = reader.f32()?;
    let focused_car_index = reader.i32()?;
    let active_camera_set = reader.string()?;
    let active_camera = reader.string()?;
    let current_hud_page = reader.string()?;

    let replay = if reader.flag()? {
        Some(ReplayState {
            session_time_ms: reader.f32()?,
            remaining_ms: reader.f32()?,
        })
    } else {
        None
    };

    Ok(SessionUpdate {
        event_index,
        session_index,
        session_type,
        phase,
        session_time_ms,
        session_end_time_ms,
        focused_car_index,
        active_camera_set,
        active_camera,
        current_hud_page,
        replay,
        time_of_day_secs: reader.f32()?,
        ambient_temp: reader.u8()?,
        track_temp: reader.u8()?,
        clouds: f32::from(reader.u8()?) / 10.0,
        rain_level: f32::from(reader.u8()?) / 10.0,
        wetness: f32::from(reader.u8()?) / 10.0,
        best_session_lap: read_lap(reader)?,
    })
}

fn read_car_update(reader: &mut FrameReader<'_>, spline_offset: f64) -> Result<RealtimeCarUpdate> {
    Ok(RealtimeCarUpdate {
        car_id: reader.u16()?,
        driver_index: reader.u16()?,
        driver_count: reader.u8()?,
        gear: (i16::from(reader.u8()?) - 2) as i8,
        world_pos_x: reader.f32()?,
        world_pos_y: reader.f32()?,
        yaw: reader.f32()?,
        location: CarLocation::from(reader.u8()?),
        speed_kmh: reader.u16()?,
        position: reader.u16()?,
        cup_position: reader.u16()?,
        track_position: reader.u16()?,
        spline_position: normalize_spline(f64::from(reader.f32()?), spline_offset),
        laps: reader.u16()?,
        delta_ms: reader.i32()?,
        best_session_lap: read_lap(reader)?,
        last_lap: read_lap(reader)?,
        current_lap: read_lap(reader)?,
    })
}

fn read_entry_list(reader: &mut FrameReader<'_>) -> Result<EntryList> {
    let connection_id = reader.i32()?;
    let count = reader.u16()?;
    let mut car_ids = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        car_ids.push(reader.u16()?);
    }
    Ok(EntryList { connection_id, car_ids })
}

fn read_car_info(reader: &mut FrameReader<'_>) -> Result<CarInfo> {
    let car_id = reader.u16()?;
    let car_model = reader.u8()?;
    let team_name = reader.string()?;
    let race_number = reader.i32()?;
    let cup_category = reader.u8()?;
    let current_driver_index = reader.u8()?;
    let nationality = reader.u16()?;

    let driver_count = reader.u8()?;
    let mut drivers = Vec::with_capacity(usize::from(driver_count));
    for _ in 0..driver_count {
        drivers.push(DriverInfo {
            first_name: reader.string()?,
            last_name: reader.string()?,
            short_name: reader.string()?,
            category: DriverCategory::from(reader.u8()?),
            nationality: reader.u16()?,
        });
    }

    Ok(CarInfo {
        car_id,
        car_model,
        team_name,
        race_number,
        cup_category,
        current_driver_index,
        nationality,
        drivers,
    })
}

fn read_track_data(reader: &mut FrameReader<'_>) -> Result<TrackData> {
    let connection_id = reader.i32()?;
    let track_name = reader.string()?;
    let track_id = TrackId::from_wire(reader.i32()?);
    let track_meters = reader.i32()?;

    let set_count = reader.u8()?;
    let mut camera_sets = Vec::with_capacity(usize::from(set_count));
    for _ in 0..set_count {
        let name = reader.string()?;
        let camera_count = reader.u8()?;
        let mut cameras = Vec::with_capacity(usize::from(camera_count));
        for _ in 0..camera_count {
            cameras.push(reader.string()?);
        }
        camera_sets.push(CameraSet { name, cameras });
    }

    let page_count = reader.u8()?;
    let mut hud_pages = Vec::with_capacity(usize::from(page_count));
    for _ in 0..page_count {
        hud_pages.push(reader.string()?);
    }

    Ok(TrackData {
        connection_id,
        track_name,
        track_id,
        track_meters,
        camera_sets,
        hud_pages,
    })
}

fn read_event(reader: &mut FrameReader<'_>) -> Result<BroadcastingEvent> {
    Ok(BroadcastingEvent {
        event_type: BroadcastingEventType::from(reader.u8()?),
        message: reader.string()?,
        time_ms: reader.i32()?,
        car_id: reader.i32()?,
    })
}
