use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::core::{ClientConfig, Error, Result, SessionContext};
use super::codec::FrameCodec;
use super::message::*;
use super::UNREGISTERED;

/// Connection lifecycle as seen by this client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Not registered, or explicitly disconnected
    Disconnected,

    /// Register request sent, waiting for the result
    AwaitingRegistration {
        /// Rejections received so far
        rejections: u32,
        /// When to send the next register request after a rejection
        retry_at: Option<Instant>,
    },

    /// Registered with the simulator
    Connected {
        /// Connection may not send commands
        readonly: bool,
    },
}

/// Events published to subscribers of a connection
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    /// A registration result arrived
    ConnectionStateChanged {
        connection_id: i32,
        success: bool,
        readonly: bool,
        error: String,
    },
    /// The roster was cleared and will be resent car by car
    NewEntryList,
    /// A car joined or was refreshed in the roster
    EntryListCar(CarInfo),
    /// Session-wide realtime update
    SessionUpdate(SessionUpdate),
    /// Realtime update of a car known to the roster
    CarUpdate(RealtimeCarUpdate),
    /// Track information
    TrackData(TrackData),
    /// Flag, penalty or incident
    BroadcastingEvent(BroadcastingEvent),
}

/// Information about the current protocol state
#[derive(Debug, Clone)]
pub struct StateInfo {
    /// Current state type
    pub state_type: &'static str,
    /// Connection id, -1 until registered
    pub connection_id: i32,
    /// Cars in the roster
    pub roster_size: usize,
    /// Whether commands are refused
    pub readonly: bool,
    /// Registration rejections in the current attempt cycle
    pub rejections: u32,
}

/// Protocol state machine owning the roster of one connection
pub struct ProtocolState {
    /// Current state
    state: ConnectionState,
    /// Connection id of the last registration result
    connection_id: i32,
    /// Driver count of every car in the current entry list
    roster: HashMap<u16, u8>,
    /// When an entry list was last requested
    last_entry_list_request: Option<Instant>,
    /// Frame codec, carries the track spline offset
    codec: FrameCodec,
    /// Channel for sending messages to the simulator
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    /// Channel for publishing events
    events_tx: mpsc::UnboundedSender<BroadcastEvent>,
    /// Configuration
    config: ClientConfig,
    /// Session logging and timings
    ctx: SessionContext,
}

impl ProtocolState {
    /// Creates a new protocol state machine
    pub fn new(
        config: ClientConfig,
        ctx: SessionContext,
        outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
        events_tx: mpsc::UnboundedSender<BroadcastEvent>,
    ) -> Self {
        ProtocolState {
            state: ConnectionState::Disconnected,
            connection_id: UNREGISTERED,
            roster: HashMap::new(),
            last_entry_list_request: None,
            codec: FrameCodec::new(),
            outbound_tx,
            events_tx,
            config,
            ctx,
        }
    }

    /// Current state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Connection id, -1 until registered
    pub fn connection_id(&self) -> i32 {
        self.connection_id
    }

    /// Whether the simulator accepted the registration
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    /// Codec used for inbound frames
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub(crate) fn codec_mut(&mut self) -> &mut FrameCodec {
        &mut self.codec
    }

    /// Gets information about the current state
    pub fn get_state_info(&self) -> StateInfo {
        let (state_type, readonly, rejections) = match &self.state {
            ConnectionState::Disconnected => ("Disconnected", false, 0),
            ConnectionState::AwaitingRegistration { rejections, .. } => {
                ("AwaitingRegistration", false, *rejections)
            }
            ConnectionState::Connected { readonly } => ("Connected", *readonly, 0),
        };

        StateInfo {
            state_type,
            connection_id: self.connection_id,
            roster_size: self.roster.len(),
            readonly,
            rejections,
        }
    }

    /// Sends a registration request
    pub fn register(&mut self) -> Result<()> {
        let rejections = match &self.state {
            ConnectionState::AwaitingRegistration { rejections, .. } => *rejections,
            _ => 0,
        };

        self.send(OutboundMessage::Register {
            display_name: self.config.display_name.clone(),
            connection_password: self.config.connection_password.clone(),
            update_interval_ms: self.config.update_interval_ms(),
            command_password: self.config.command_password.clone(),
        })?;

        self.state = ConnectionState::AwaitingRegistration {
            rejections,
            retry_at: None,
        };
        Ok(())
    }

    /// When the next registration attempt is due, if one is scheduled
    pub fn next_retry(&self) -> Option<Instant> {
        match &self.state {
            ConnectionState::AwaitingRegistration { retry_at, .. } => *retry_at,
            _ => None,
        }
    }

    /// Re-sends the registration once its backoff has elapsed
    pub fn poll_retry(&mut self, now: Instant) -> Result<()> {
        match self.next_retry() {
            Some(retry_at) if retry_at <= now => {
                debug!(parent: self.ctx.span(), "retrying registration");
                self.register()
            }
            _ => Ok(()),
        }
    }

    /// Decodes one datagram and dispatches it
    pub fn handle_frame(&mut self, frame: &[u8], now: Instant) -> Result<()> {
        self.handle_datagram(&mut BytesMut::from(frame), now)
    }

    /// Decodes the datagram held in `src` and dispatches it
    ///
    /// The datagram is consumed whether or not it decodes.
    pub fn handle_datagram(&mut self, src: &mut BytesMut, now: Instant) -> Result<()> {
        if matches!(self.state, ConnectionState::Disconnected) {
            trace!(parent: self.ctx.span(), len = src.len(), "dropping frame while disconnected");
            src.clear();
            return Ok(());
        }

        let decoded = {
            let _timing = self.ctx.time("protocol.decode");
            self.codec.decode(src)?
        };
        match decoded {
            Some(message) => self.handle_message(message, now),
            None => Ok(()),
        }
    }

    /// Handles a decoded message
    pub fn handle_message(&mut self, message: InboundMessage, now: Instant) -> Result<()> {
        match message {
            InboundMessage::RegistrationResult(result) => self.handle_registration(result, now),

            InboundMessage::EntryList(list) => {
                debug!(parent: self.ctx.span(), cars = list.car_ids.len(), "new entry list");
                self.roster.clear();
                self.publish(BroadcastEvent::NewEntryList);
                Ok(())
            }

            InboundMessage::EntryListCar(car) => {
                self.roster.insert(car.car_id, car.drivers.len() as u8);
                self.publish(BroadcastEvent::EntryListCar(car));
                Ok(())
            }

            InboundMessage::RealtimeCarUpdate(update) => {
                match self.roster.get(&update.car_id).copied() {
                    Some(driver_count) if driver_count == update.driver_count => {
                        self.publish(BroadcastEvent::CarUpdate(update));
                        Ok(())
                    }
                    known => {
                        debug!(
                            parent: self.ctx.span(),
                            car_id = update.car_id,
                            known = known.is_some(),
                            "car update out of sync with entry list"
                        );
                        self.request_entry_list_throttled(now)
                    }
                }
            }

            InboundMessage::RealtimeUpdate(update) => {
                self.publish(BroadcastEvent::SessionUpdate(update));
                Ok(())
            }

            InboundMessage::TrackData(track) => {
                let offset = track.track_id.spline_offset();
                info!(
                    parent: self.ctx.span(),
                    track = %track.track_name,
                    meters = track.track_meters,
                    offset,
                    "track data received"
                );
                self.codec.set_spline_offset(offset);
                self.publish(BroadcastEvent::TrackData(track));
                Ok(())
            }

            InboundMessage::BroadcastingEvent(event) => {
                self.publish(BroadcastEvent::BroadcastingEvent(event));
                Ok(())
            }
        }
    }

    /// Sends a command on the established connection
    pub fn send_command(&mut self, command: Command) -> Result<()> {
        let readonly = match &self.state {
            ConnectionState::Connected { readonly } => *readonly,
            _ => return Err(Error::invalid_state("Commands require a registered connection")),
        };

        let is_request = matches!(command, Command::RequestEntryList | Command::RequestTrackData);
        if readonly && !is_request {
            return Err(Error::invalid_state("Connection is readonly"));
        }

        self.send(command.into_message(self.connection_id))
    }

    /// Unregisters from the simulator; no frames are processed afterwards
    pub fn disconnect(&mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Disconnected) {
            return Ok(());
        }

        self.state = ConnectionState::Disconnected;
        self.roster.clear();
        if self.connection_id != UNREGISTERED {
            self.send(OutboundMessage::Unregister {
                connection_id: self.connection_id,
            })?;
        }
        Ok(())
    }

    fn handle_registration(&mut self, result: RegistrationResult, now: Instant) -> Result<()> {
        let rejections = match &self.state {
            ConnectionState::AwaitingRegistration { rejections, .. } => *rejections,
            ConnectionState::Connected { .. } => 0,
            ConnectionState::Disconnected => {
                return Err(Error::protocol("Received registration result while disconnected"));
            }
        };

        self.connection_id = result.connection_id;
        self.publish(BroadcastEvent::ConnectionStateChanged {
            connection_id: result.connection_id,
            success: result.success,
            readonly: result.readonly,
            error: result.error_message.clone(),
        });

        if result.success {
            info!(
                parent: self.ctx.span(),
                connection_id = result.connection_id,
                readonly = result.readonly,
                "registered"
            );
            self.state = ConnectionState::Connected {
                readonly: result.readonly,
            };
            self.request_entry_list(now)?;
            return self.send(OutboundMessage::RequestTrackData {
                connection_id: self.connection_id,
            });
        }

        let rejections = rejections + 1;
        if rejections >= self.config.retry.max_attempts {
            warn!(
                parent: self.ctx.span(),
                rejections,
                error = %result.error_message,
                "registration rejected, giving up"
            );
            self.state = ConnectionState::Disconnected;
            return Err(Error::RegistrationRejected {
                attempts: rejections,
                reason: result.error_message,
            });
        }

        let delay = self.config.retry.backoff(rejections);
        warn!(
            parent: self.ctx.span(),
            rejections,
            delay_ms = delay.as_millis() as u64,
            error = %result.error_message,
            "registration rejected, retrying"
        );
        self.state = ConnectionState::AwaitingRegistration {
            rejections,
            retry_at: Some(now + delay),
        };
        Ok(())
    }

    fn request_entry_list_throttled(&mut self, now: Instant) -> Result<()> {
        let remaining =
            entry_list_cooldown_remaining(self.last_entry_list_request, now, self.config.entry_list_cooldown);

        if remaining.is_zero() {
            self.request_entry_list(now)
        } else {
            Ok(())
        }
    }

    fn request_entry_list(&mut self, now: Instant) -> Result<()> {
        self.last_entry_list_request = Some(now);
        self.send(OutboundMessage::RequestEntryList {
            connection_id: self.connection_id,
        })
    }

    fn send(&self, message: OutboundMessage) -> Result<()> {
        let message_type = message.message_type();
        self.outbound_tx
            .send(message)
            .map_err(|e| Error::protocol(format!("Failed to queue message {}: {}", message_type, e)))
    }

    fn publish(&self, event: BroadcastEvent) {
        if self.events_tx.send(event).is_err() {
            trace!(parent: self.ctx.span(), "no event subscriber");
        }
    }
}

/// Time left before another entry list may be requested
pub fn entry_list_cooldown_remaining(last: Option<Instant>, now: Instant, cooldown: Duration) -> Duration {
    last.map_or(Duration::ZERO, |last| {
        cooldown.saturating_sub(now.saturating_duration_since(last))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use crate::protocol::codec::fixtures;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        state: ProtocolState,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        events: mpsc::UnboundedReceiver<BroadcastEvent>,
    }

    impl Harness {
        fn new(config: ClientConfig) -> Self {
            let (outbound_tx, outbound) = mpsc::unbounded_channel();
            let (events_tx, events) = mpsc::unbounded_channel();
            let state = ProtocolState::new(config, SessionContext::default(), outbound_tx, events_tx);
            Harness { state, outbound, events }
        }

        fn connected(now: Instant) -> Self {
            let mut harness = Harness::new(ClientConfig::default());
            harness.state.register().unwrap();
            harness
                .state
                .handle_frame(&fixtures::registration_result(7, true, ""), now)
                .unwrap();
            harness.drain();
            harness
        }

        fn drain(&mut self) -> (Vec<OutboundMessage>, Vec<BroadcastEvent>) {
            let mut sent = Vec::new();
            while let Ok(message) = self.outbound.try_recv() {
                sent.push(message);
            }
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            (sent, events)
        }
    }

    fn count_entry_list_requests(sent: &[OutboundMessage]) -> usize {
        sent.iter()
            .filter(|m| matches!(m, OutboundMessage::RequestEntryList { .. }))
            .count()
    }

    #[test]
    fn test_datagram_is_consumed() {
        let now = Instant::now();
        let mut harness = Harness::connected(now);

        let mut datagram = BytesMut::from(&fixtures::entry_list(7, &[1, 2])[..]);
        assert_ok!(harness.state.handle_datagram(&mut datagram, now));
        assert!(datagram.is_empty());
        let (_, events) = harness.drain();
        assert!(matches!(events.as_slice(), [BroadcastEvent::NewEntryList]));

        let mut garbage = BytesMut::from(&[99u8, 0, 0][..]);
        let err = harness.state.handle_datagram(&mut garbage, now).unwrap_err();
        assert!(err.is_frame_local());
        assert!(garbage.is_empty());
    }

    #[test]
    fn test_registration_success_requests_data() {
        let now = Instant::now();
        let mut harness = Harness::new(ClientConfig::default());
        harness.state.register().unwrap();
        assert_eq!(harness.state.get_state_info().state_type, "AwaitingRegistration");

        harness
            .state
            .handle_frame(&fixtures::registration_result(7, true, ""), now)
            .unwrap();

        let (sent, events) = harness.drain();
        assert!(matches!(sent[0], OutboundMessage::Register { update_interval_ms: 100, .. }));
        assert_eq!(sent[1], OutboundMessage::RequestEntryList { connection_id: 7 });
        assert_eq!(sent[2], OutboundMessage::RequestTrackData { connection_id: 7 });
        assert_eq!(
            events,
            vec![BroadcastEvent::ConnectionStateChanged {
                connection_id: 7,
                success: true,
                readonly: false,
                error: String::new(),
            }]
        );
        assert!(harness.state.is_connected());
        assert_eq!(harness.state.connection_id(), 7);
    }

    #[test]
    fn test_registration_rejection_backs_off_then_gives_up() {
        let now = Instant::now();
        let mut config = ClientConfig::default();
        config.retry = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            max_attempts: 3,
            jitter: Duration::ZERO,
        };
        let mut harness = Harness::new(config);
        harness.state.register().unwrap();

        let rejected = fixtures::registration_result(-1, false, "wrong password");
        harness.state.handle_frame(&rejected, now).unwrap();
        assert_eq!(harness.state.next_retry(), Some(now + Duration::from_millis(100)));

        // Not yet due
        harness.state.poll_retry(now + Duration::from_millis(50)).unwrap();
        let (sent, _) = harness.drain();
        assert_eq!(sent.len(), 1);

        harness.state.poll_retry(now + Duration::from_millis(100)).unwrap();
        let (sent, _) = harness.drain();
        assert!(matches!(sent[0], OutboundMessage::Register { .. }));
        assert_eq!(harness.state.next_retry(), None);

        let later = now + Duration::from_millis(100);
        harness.state.handle_frame(&rejected, later).unwrap();
        assert_eq!(harness.state.next_retry(), Some(later + Duration::from_millis(200)));
        assert_eq!(harness.state.get_state_info().rejections, 2);

        harness.state.register().unwrap();
        let err = harness.state.handle_frame(&rejected, later).unwrap_err();
        assert!(matches!(err, Error::RegistrationRejected { attempts: 3, .. }));
        assert_eq!(*harness.state.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_entry_list_reconciliation() {
        let now = Instant::now();
        let mut harness = Harness::connected(now);

        harness.state.handle_frame(&fixtures::entry_list(7, &[1, 2]), now).unwrap();
        harness
            .state
            .handle_frame(&fixtures::entry_list_car(1, 0, &["Alpha"]), now)
            .unwrap();
        harness
            .state
            .handle_frame(&fixtures::entry_list_car(2, 0, &["Beta", "Gamma"]), now)
            .unwrap();
        assert_eq!(harness.state.get_state_info().roster_size, 2);

        harness.state.handle_frame(&fixtures::car_update(1, 1, 1, 0.3, 4), now).unwrap();
        // Car 2 has two drivers in the roster
        harness.state.handle_frame(&fixtures::car_update(2, 1, 2, 0.2, 4), now).unwrap();

        let (_, events) = harness.drain();
        assert_eq!(events[0], BroadcastEvent::NewEntryList);
        assert!(matches!(&events[1], BroadcastEvent::EntryListCar(car) if car.car_id == 1));
        assert!(matches!(&events[2], BroadcastEvent::EntryListCar(car) if car.car_id == 2));
        assert!(matches!(&events[3], BroadcastEvent::CarUpdate(update) if update.car_id == 1));
        assert_eq!(events.len(), 4);

        harness.state.handle_frame(&fixtures::entry_list(7, &[1]), now).unwrap();
        assert_eq!(harness.state.get_state_info().roster_size, 0);
    }

    #[test]
    fn test_unknown_car_refresh_is_rate_limited() {
        let start = Instant::now();
        let mut harness = Harness::connected(start);

        let t1 = start + Duration::from_secs(6);
        for _ in 0..10 {
            harness.state.handle_frame(&fixtures::car_update(42, 1, 1, 0.5, 0), t1).unwrap();
        }
        harness
            .state
            .handle_frame(&fixtures::car_update(42, 1, 1, 0.5, 0), t1 + Duration::from_secs(4))
            .unwrap();

        let (sent, events) = harness.drain();
        assert_eq!(count_entry_list_requests(&sent), 1);
        assert!(events.is_empty());

        harness
            .state
            .handle_frame(&fixtures::car_update(42, 1, 1, 0.5, 0), t1 + Duration::from_secs(5))
            .unwrap();
        let (sent, _) = harness.drain();
        assert_eq!(count_entry_list_requests(&sent), 1);
    }

    #[test]
    fn test_track_data_sets_spline_offset() {
        let now = Instant::now();
        let mut harness = Harness::connected(now);
        harness.state.handle_frame(&fixtures::track_data(7, 6, 5891), now).unwrap();
        assert_eq!(harness.state.codec().spline_offset(), 0.0207);

        let (_, events) = harness.drain();
        assert!(matches!(&events[0], BroadcastEvent::TrackData(track) if track.track_meters == 5891));
    }

    #[test]
    fn test_malformed_frame_keeps_state() {
        let now = Instant::now();
        let mut harness = Harness::connected(now);
        let err = harness.state.handle_frame(&[200, 1, 2, 3], now).unwrap_err();
        assert!(err.is_frame_local());
        assert!(harness.state.is_connected());
    }

    #[test]
    fn test_disconnect_is_terminal_and_idempotent() {
        let now = Instant::now();
        let mut harness = Harness::connected(now);

        assert_ok!(harness.state.disconnect());
        assert_ok!(harness.state.disconnect());
        let (sent, _) = harness.drain();
        assert_eq!(sent, vec![OutboundMessage::Unregister { connection_id: 7 }]);

        harness.state.handle_frame(&fixtures::entry_list(7, &[1]), now).unwrap();
        let (_, events) = harness.drain();
        assert!(events.is_empty());
        assert_eq!(harness.state.get_state_info().state_type, "Disconnected");
    }

    #[test]
    fn test_readonly_connection_refuses_commands() {
        let now = Instant::now();
        let mut harness = Harness::new(ClientConfig::default());
        harness.state.register().unwrap();
        let mut frame = fixtures::registration_result(3, true, "");
        // readonly flag byte follows the success flag
        frame[6] = 0;
        harness.state.handle_frame(&frame, now).unwrap();
        assert!(harness.state.get_state_info().readonly);

        let err = assert_err!(harness.state.send_command(Command::ChangeHudPage("Basic HUD".into())));
        assert!(matches!(err, Error::InvalidState(_)));
        assert_ok!(harness.state.send_command(Command::RequestTrackData));
    }

    #[test]
    fn test_commands_require_connection() {
        let mut harness = Harness::new(ClientConfig::default());
        assert_err!(harness.state.send_command(Command::RequestEntryList));
    }

    #[test]
    fn test_cooldown_remaining() {
        let now = Instant::now();
        let cooldown = Duration::from_secs(5);
        assert_eq!(entry_list_cooldown_remaining(None, now, cooldown), Duration::ZERO);
        assert_eq!(
            entry_list_cooldown_remaining(Some(now), now + Duration::from_secs(2), cooldown),
            Duration::from_secs(3)
        );
    }
}
