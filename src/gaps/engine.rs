//! Leaderboard engine
//!
//! Consumes the client's event stream, tracks every car of the roster and
//! produces a ranked [`LeaderboardSnapshot`] with gaps on each session update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::core::{
    AccClassifier, CarClass, Classifier, EngineConfig, GapPolicy, RankingOrder, Result, SessionContext, TeamCupCategory,
    TrackId,
};
use crate::protocol::{BroadcastEvent, CarInfo, CarLocation, RealtimeCarUpdate, SessionType, SessionUpdate, TrackData};
use crate::track::{DirectorySource, LapDataSource, NoLapData, ReferenceStore};
use crate::util::relative_spline_position;

use super::buckets::BucketTracker;
use super::{best_lap_gap, laps_apart, on_track_gap, reference_gap, Gap, TrackPosition};

/// Gaps from one car to the cars it is compared against
///
/// Fields are `None` when the target does not exist, is the car itself, or
/// the gap cannot be computed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GapResult {
    pub to_leader: Option<Gap>,
    pub to_class_leader: Option<Gap>,
    pub to_cup_leader: Option<Gap>,
    pub to_ahead: Option<Gap>,
    pub to_ahead_in_class: Option<Gap>,
    pub to_ahead_in_cup: Option<Gap>,
    /// By total distance driven
    pub to_focused: Option<Gap>,
    /// By position on track, ignoring laps
    pub to_focused_on_track: Option<Gap>,
    pub to_ahead_on_track: Option<Gap>,
}

/// One ranked car
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub car_id: u16,
    pub race_number: i32,
    pub team_name: String,
    /// Name of the driver in the car
    pub driver: Option<String>,
    pub class: CarClass,
    pub cup: TeamCupCategory,
    /// 1-based rank overall
    pub overall_rank: usize,
    /// 1-based rank within the class
    pub class_rank: usize,
    /// 1-based rank within the cup of the class
    pub cup_rank: usize,
    /// Position reported by the simulator
    pub official_position: u16,
    /// Laps counted by the engine
    pub laps: u32,
    pub spline_position: f64,
    pub location: CarLocation,
    pub best_lap_secs: Option<f64>,
    pub last_lap_secs: Option<f64>,
    pub gaps: GapResult,
}

/// Immutable leaderboard published once per session update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardSnapshot {
    pub track: Option<TrackId>,
    pub session_index: u16,
    pub session_type: SessionType,
    pub session_time_ms: f32,
    pub focused_car: Option<u16>,
    /// Entries in overall order
    pub entries: Vec<LeaderboardEntry>,
}

impl LeaderboardSnapshot {
    /// Entry of `car_id`, if ranked
    pub fn entry(&self, car_id: u16) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| e.car_id == car_id)
    }

    /// Entries of one class in class order
    pub fn class(&self, class: CarClass) -> impl Iterator<Item = &LeaderboardEntry> {
        self.entries.iter().filter(move |e| e.class == class)
    }
}

/// Roster data of a car
#[derive(Debug, Clone)]
struct RosterEntry {
    info: CarInfo,
    class: CarClass,
    cup: TeamCupCategory,
}

/// Tracking state of a car that sent realtime updates
#[derive(Debug, Clone, Default)]
struct CarState {
    update: Option<RealtimeCarUpdate>,
    laps: u32,
    buckets: BucketTracker,
    /// Updated since the last session update
    seen: bool,
    missed_updates: u32,
}

impl CarState {
    fn apply(&mut self, update: &RealtimeCarUpdate, clock: f64) {
        let spline = update.spline_position;
        match &self.update {
            None => self.laps = u32::from(update.laps),
            Some(previous) => {
                let crossed_line = previous.spline_position > 0.9 && spline < 0.1;
                if crossed_line && previous.location == update.location {
                    self.laps += 1;
                }
            }
        }

        self.buckets.record(spline, self.laps, clock);
        self.update = Some(update.clone());
        self.seen = true;
        self.missed_updates = 0;
    }
}

/// Car considered for ranking
struct Ranked<'a> {
    car_id: u16,
    roster: &'a RosterEntry,
    car: &'a CarState,
    update: &'a RealtimeCarUpdate,
    position: TrackPosition,
}

/// Comparison targets of one ranked car, as indices into the ranking
#[derive(Debug, Clone, Copy)]
struct Targets {
    leader: Option<usize>,
    class_leader: Option<usize>,
    cup_leader: Option<usize>,
    ahead: Option<usize>,
    ahead_in_class: Option<usize>,
    ahead_in_cup: Option<usize>,
    ahead_on_track: Option<usize>,
    class_rank: usize,
    cup_rank: usize,
}

/// Ranks cars and computes gaps between them
///
/// All state is owned by the engine; consumers only ever see snapshots.
pub struct LeaderboardEngine {
    config: EngineConfig,
    ctx: SessionContext,
    classifier: Box<dyn Classifier>,
    source: Box<dyn LapDataSource>,
    /// Reference curves of the current track, `None` until track data arrives
    store: Option<ReferenceStore>,
    roster: HashMap<u16, RosterEntry>,
    cars: HashMap<u16, CarState>,
    session: Option<SessionUpdate>,
    /// Origin of the bucket clock
    epoch: Instant,
}

impl LeaderboardEngine {
    /// Creates an engine with the given classification and reference laps
    pub fn new(
        config: EngineConfig,
        ctx: SessionContext,
        classifier: Box<dyn Classifier>,
        source: Box<dyn LapDataSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(LeaderboardEngine {
            config,
            ctx,
            classifier,
            source,
            store: None,
            roster: HashMap::new(),
            cars: HashMap::new(),
            session: None,
            epoch: Instant::now(),
        })
    }

    /// Creates an engine with the built-in car table, reading reference laps
    /// from the configured directory
    pub fn from_config(config: EngineConfig, ctx: SessionContext) -> Result<Self> {
        let source: Box<dyn LapDataSource> = match &config.reference_dir {
            Some(dir) => Box::new(DirectorySource::new(dir.clone())),
            None => Box::new(NoLapData),
        };
        Self::new(config, ctx, Box::new(AccClassifier), source)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reference curves of the current track
    pub fn store(&self) -> Option<&ReferenceStore> {
        self.store.as_ref()
    }

    /// Number of cars with tracking state
    pub fn tracked_cars(&self) -> usize {
        self.cars.len()
    }

    /// Applies one event, returning a new snapshot after session updates
    pub fn handle_event(&mut self, event: &BroadcastEvent, now: Instant) -> Option<LeaderboardSnapshot> {
        match event {
            BroadcastEvent::NewEntryList => {
                self.roster.clear();
                None
            }
            BroadcastEvent::EntryListCar(info) => {
                self.upsert_car(info);
                None
            }
            BroadcastEvent::TrackData(track) => {
                self.load_track(track);
                None
            }
            BroadcastEvent::CarUpdate(update) => {
                self.update_car(update, now);
                None
            }
            BroadcastEvent::SessionUpdate(update) => {
                self.track_session(update);
                self.expire_cars();
                Some(self.compute(update))
            }
            BroadcastEvent::ConnectionStateChanged { .. } | BroadcastEvent::BroadcastingEvent(_) => None,
        }
    }

    /// Feeds events into the engine until the stream ends, publishing each snapshot
    ///
    /// Also stops once every snapshot receiver is gone.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<BroadcastEvent>,
        snapshots: watch::Sender<Option<Arc<LeaderboardSnapshot>>>,
    ) {
        while let Some(event) = events.recv().await {
            if let Some(snapshot) = self.handle_event(&event, Instant::now()) {
                if snapshots.send(Some(Arc::new(snapshot))).is_err() {
                    debug!(parent: self.ctx.span(), "no snapshot receivers left");
                    break;
                }
            }
        }
        debug!(parent: self.ctx.span(), "leaderboard engine stopped");
    }

    fn upsert_car(&mut self, info: &CarInfo) {
        let entry = RosterEntry {
            info: info.clone(),
            class: self.classifier.classify(info.car_model),
            cup: self.classifier.cup_of(info.cup_category),
        };
        debug!(
            parent: self.ctx.span(),
            car_id = info.car_id,
            class = %entry.class,
            "entry list car"
        );
        self.roster.insert(info.car_id, entry);
    }

    fn load_track(&mut self, track: &TrackData) {
        if self.store.as_ref().is_some_and(|s| s.track() == track.track_id) {
            return;
        }

        let _timing = self.ctx.time("engine.load_track");
        let store = {
            let _entered = self.ctx.span().enter();
            ReferenceStore::load(self.source.as_ref(), track.track_id, f64::from(track.track_meters))
        };
        info!(
            parent: self.ctx.span(),
            track = %track.track_id,
            meters = track.track_meters,
            "track changed, resetting cars"
        );
        self.store = Some(store);
        self.cars.clear();
    }

    fn update_car(&mut self, update: &RealtimeCarUpdate, now: Instant) {
        if !self.roster.contains_key(&update.car_id) {
            debug!(parent: self.ctx.span(), car_id = update.car_id, "update for car outside the roster");
            return;
        }
        let clock = now.saturating_duration_since(self.epoch).as_secs_f64();
        self.cars.entry(update.car_id).or_default().apply(update, clock);
    }

    /// Resets per-car state when a new session starts
    fn track_session(&mut self, update: &SessionUpdate) {
        if let Some(previous) = &self.session {
            let changed = previous.session_index != update.session_index
                || previous.session_type != update.session_type
                || update.session_time_ms < previous.session_time_ms;
            if changed {
                info!(
                    parent: self.ctx.span(),
                    session_index = update.session_index,
                    session_type = ?update.session_type,
                    "session changed, resetting cars"
                );
                self.cars.clear();
            }
        }
        self.session = Some(update.clone());
    }

    /// Drops cars that missed too many session updates in a row
    fn expire_cars(&mut self) {
        let limit = self.config.missed_update_limit;
        let span = self.ctx.span();
        self.cars.retain(|car_id, car| {
            if std::mem::take(&mut car.seen) {
                return true;
            }
            car.missed_updates += 1;
            if car.missed_updates >= limit {
                debug!(parent: span, car_id, missed = car.missed_updates, "removing car without updates");
                return false;
            }
            true
        });
    }

    fn compute(&self, session: &SessionUpdate) -> LeaderboardSnapshot {
        let _timing = self.ctx.time("engine.update");
        let race = session.session_type.is_race();

        let mut ranked = self.ranked_cars();
        match self.config.ranking {
            RankingOrder::TotalSplinePosition if race => {
                ranked.sort_by(|a, b| b.position.total.total_cmp(&a.position.total));
            }
            _ => {
                // Position 0 means the simulator has not ranked the car
                ranked.retain(|r| r.update.position != 0);
                ranked.sort_by_key(|r| r.update.position);
            }
        }

        let targets = targets(&ranked);
        let focused = u16::try_from(session.focused_car_index)
            .ok()
            .and_then(|id| ranked.iter().position(|r| r.car_id == id));

        let entries = ranked
            .iter()
            .zip(&targets)
            .enumerate()
            .map(|(index, (this, targets))| {
                let gap = |target: Option<usize>| target.and_then(|t| self.gap(race, this, &ranked[t]));
                let on_track = |target: Option<usize>| target.and_then(|t| self.on_track(this, &ranked[t]));

                let gaps = GapResult {
                    to_leader: gap(targets.leader),
                    to_class_leader: gap(targets.class_leader),
                    to_cup_leader: gap(targets.cup_leader),
                    to_ahead: gap(targets.ahead),
                    to_ahead_in_class: gap(targets.ahead_in_class),
                    to_ahead_in_cup: gap(targets.ahead_in_cup),
                    to_focused: gap(focused),
                    to_focused_on_track: on_track(focused),
                    to_ahead_on_track: on_track(targets.ahead_on_track),
                };

                LeaderboardEntry {
                    car_id: this.car_id,
                    race_number: this.roster.info.race_number,
                    team_name: this.roster.info.team_name.clone(),
                    driver: this
                        .roster
                        .info
                        .drivers
                        .get(usize::from(this.update.driver_index))
                        .map(|d| format!("{} {}", d.first_name, d.last_name)),
                    class: this.roster.class,
                    cup: this.roster.cup,
                    overall_rank: index + 1,
                    class_rank: targets.class_rank,
                    cup_rank: targets.cup_rank,
                    official_position: this.update.position,
                    laps: this.car.laps,
                    spline_position: this.update.spline_position,
                    location: this.update.location,
                    best_lap_secs: this.update.best_session_lap.lap_time_secs(),
                    last_lap_secs: this.update.last_lap.lap_time_secs(),
                    gaps,
                }
            })
            .collect();

        LeaderboardSnapshot {
            track: self.store.as_ref().map(ReferenceStore::track),
            session_index: session.session_index,
            session_type: session.session_type,
            session_time_ms: session.session_time_ms,
            focused_car: focused.map(|f| ranked[f].car_id),
            entries,
        }
    }

    /// Cars in the roster with at least one update, ordered by car id
    fn ranked_cars(&self) -> Vec<Ranked<'_>> {
        let mut ranked: Vec<Ranked<'_>> = self
            .cars
            .iter()
            .filter_map(|(car_id, car)| {
                let roster = self.roster.get(car_id)?;
                let update = car.update.as_ref()?;
                Some(Ranked {
                    car_id: *car_id,
                    roster,
                    car,
                    update,
                    position: TrackPosition {
                        class: roster.class,
                        total: f64::from(car.laps) + update.spline_position,
                        spline: update.spline_position,
                    },
                })
            })
            .collect();
        ranked.sort_by_key(|r| r.car_id);
        ranked
    }

    /// Gap by distance driven, or by best lap outside races
    fn gap(&self, race: bool, this: &Ranked<'_>, other: &Ranked<'_>) -> Option<Gap> {
        if this.car_id == other.car_id {
            return None;
        }
        if !race {
            return best_lap_gap(
                this.update.best_session_lap.lap_time_secs(),
                other.update.best_session_lap.lap_time_secs(),
            );
        }

        let store = self.store.as_ref()?;
        let fallback = || reference_gap(&this.position, &other.position, store, self.config.fallback_speed_kmh);
        match self.config.gap_policy {
            GapPolicy::ReferenceCurve => Some(fallback()),
            GapPolicy::LiveBuckets => Some(self.bucket_gap(this, other).unwrap_or_else(fallback)),
        }
    }

    /// Gap from the latest marker both cars passed on the same lap
    fn bucket_gap(&self, this: &Ranked<'_>, other: &Ranked<'_>) -> Option<Gap> {
        let distance = other.position.total - this.position.total;
        if let Some(laps) = laps_apart(distance) {
            return Some(laps);
        }

        let secs = if distance >= 0.0 {
            this.car.buckets.time_behind(&other.car.buckets)?
        } else {
            -other.car.buckets.time_behind(&this.car.buckets)?
        };
        Some(Gap::Time(secs / self.config.time_multiplier))
    }

    fn on_track(&self, this: &Ranked<'_>, other: &Ranked<'_>) -> Option<Gap> {
        if this.car_id == other.car_id {
            return None;
        }
        let store = self.store.as_ref()?;
        Some(on_track_gap(&this.position, &other.position, store, self.config.fallback_speed_kmh))
    }
}

/// Resolves ranks and comparison targets for cars in overall order
fn targets(ranked: &[Ranked<'_>]) -> Vec<Targets> {
    let mut class_leaders = HashMap::new();
    let mut cup_leaders = HashMap::new();
    let mut last_in_class = HashMap::new();
    let mut last_in_cup = HashMap::new();
    let mut class_counts: HashMap<CarClass, usize> = HashMap::new();
    let mut cup_counts: HashMap<(CarClass, TeamCupCategory), usize> = HashMap::new();

    ranked
        .iter()
        .enumerate()
        .map(|(index, this)| {
            let class = this.roster.class;
            let cup = (class, this.roster.cup);

            let class_rank = class_counts.entry(class).or_default();
            *class_rank += 1;
            let cup_rank = cup_counts.entry(cup).or_default();
            *cup_rank += 1;

            Targets {
                leader: Some(0),
                class_leader: Some(*class_leaders.entry(class).or_insert(index)),
                cup_leader: Some(*cup_leaders.entry(cup).or_insert(index)),
                ahead: index.checked_sub(1),
                ahead_in_class: last_in_class.insert(class, index),
                ahead_in_cup: last_in_cup.insert(cup, index),
                ahead_on_track: ahead_on_track(ranked, index),
                class_rank: *class_rank,
                cup_rank: *cup_rank,
            }
        })
        .collect()
}

/// Nearest car in front on track, regardless of laps
fn ahead_on_track(ranked: &[Ranked<'_>], index: usize) -> Option<usize> {
    let this = ranked[index].position.spline;
    ranked
        .iter()
        .enumerate()
        .filter(|(other, _)| *other != index)
        .map(|(other, r)| (other, relative_spline_position(r.position.spline, this)))
        .filter(|(_, relative)| *relative > 0.0)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(other, _)| other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DriverCategory, DriverInfo, LapRecord, SessionPhase};
    use crate::track::LapSample;
    use std::time::Duration;

    /// 100 second lap at constant pace, recorded for GT3 only
    struct LinearLap;

    impl LapDataSource for LinearLap {
        fn samples(&self, _track: TrackId, class: CarClass) -> Result<Option<Vec<LapSample>>> {
            Ok((class == CarClass::Gt3).then(|| {
                vec![
                    LapSample { position: 0.0, time_ms: 0.0, speed_kmh: 0.0 },
                    LapSample { position: 1.0, time_ms: 100_000.0, speed_kmh: 0.0 },
                ]
            }))
        }
    }

    fn engine(config: EngineConfig) -> LeaderboardEngine {
        LeaderboardEngine::new(config, SessionContext::default(), Box::new(AccClassifier), Box::new(LinearLap)).unwrap()
    }

    fn info(car_id: u16, car_model: u8, cup: u8) -> CarInfo {
        CarInfo {
            car_id,
            car_model,
            team_name: format!("Team {}", car_id),
            race_number: i32::from(car_id) + 100,
            cup_category: cup,
            current_driver_index: 0,
            nationality: 0,
            drivers: vec![DriverInfo {
                first_name: "Max".to_string(),
                last_name: format!("Driver{}", car_id),
                short_name: "DRV".to_string(),
                category: DriverCategory::Gold,
                nationality: 0,
            }],
        }
    }

    fn update(car_id: u16, position: u16, laps: u16, spline: f64) -> RealtimeCarUpdate {
        RealtimeCarUpdate {
            car_id,
            driver_index: 0,
            driver_count: 1,
            gear: 4,
            world_pos_x: 0.0,
            world_pos_y: 0.0,
            yaw: 0.0,
            location: CarLocation::Track,
            speed_kmh: 200,
            position,
            cup_position: position,
            track_position: position,
            spline_position: spline,
            laps,
            delta_ms: 0,
            best_session_lap: LapRecord::default(),
            last_lap: LapRecord::default(),
            current_lap: LapRecord::default(),
        }
    }

    fn session(session_type: SessionType, time_ms: f32, focused: i32) -> SessionUpdate {
        SessionUpdate {
            event_index: 0,
            session_index: 1,
            session_type,
            phase: SessionPhase::Session,
            session_time_ms: time_ms,
            session_end_time_ms: 3_600_000.0,
            focused_car_index: focused,
            active_camera_set: String::new(),
            active_camera: String::new(),
            current_hud_page: String::new(),
            replay: None,
            time_of_day_secs: 0.0,
            ambient_temp: 20,
            track_temp: 28,
            clouds: 0.0,
            rain_level: 0.0,
            wetness: 0.0,
            best_session_lap: LapRecord::default(),
        }
    }

    fn monza() -> BroadcastEvent {
        BroadcastEvent::TrackData(TrackData {
            connection_id: 1,
            track_name: "Monza".to_string(),
            track_id: TrackId::Monza,
            track_meters: 5793,
            camera_sets: Vec::new(),
            hud_pages: Vec::new(),
        })
    }

    fn secs(gap: Option<Gap>) -> f64 {
        gap.and_then(|g| g.as_secs()).expect("time gap")
    }

    #[test]
    fn test_ranks_by_official_position() {
        let mut engine = engine(EngineConfig::default());
        let now = Instant::now();

        for car in [info(1, 0, 0), info(2, 50, 0), info(3, 1, 1), info(4, 2, 0)] {
            engine.handle_event(&BroadcastEvent::EntryListCar(car), now);
        }

        let mut fast = update(1, 2, 3, 0.4);
        fast.best_session_lap.lap_time_ms = Some(100_000);
        let mut slow = update(2, 1, 3, 0.5);
        slow.best_session_lap.lap_time_ms = Some(102_000);
        let unranked = update(4, 0, 3, 0.6);
        // Not in the roster
        let stranger = update(9, 4, 3, 0.7);
        for car in [fast, slow, update(3, 3, 3, 0.3), unranked, stranger] {
            engine.handle_event(&BroadcastEvent::CarUpdate(car), now);
        }

        let snapshot = engine
            .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Practice, 1000.0, -1)), now)
            .unwrap();

        let order: Vec<u16> = snapshot.entries.iter().map(|e| e.car_id).collect();
        assert_eq!(order, vec![2, 1, 3]);

        let gt4 = snapshot.entry(2).unwrap();
        assert_eq!((gt4.overall_rank, gt4.class_rank, gt4.cup_rank), (1, 1, 1));
        assert_eq!(gt4.class, CarClass::Gt4);
        assert_eq!(gt4.gaps.to_leader, None);

        let first_gt3 = snapshot.entry(1).unwrap();
        assert_eq!((first_gt3.overall_rank, first_gt3.class_rank, first_gt3.cup_rank), (2, 1, 1));
        assert_eq!(first_gt3.driver.as_deref(), Some("Max Driver1"));
        // Practice gaps compare best laps
        assert_eq!(first_gt3.gaps.to_leader, Some(Gap::Time(-2.0)));
        assert_eq!(first_gt3.gaps.to_class_leader, None);

        let pro_am = snapshot.entry(3).unwrap();
        assert_eq!((pro_am.overall_rank, pro_am.class_rank, pro_am.cup_rank), (3, 2, 1));
        assert_eq!(pro_am.cup, TeamCupCategory::ProAm);
        assert_eq!(pro_am.gaps.to_leader, None);
        assert_eq!(pro_am.gaps.to_cup_leader, None);

        assert_eq!(snapshot.class(CarClass::Gt3).count(), 2);
        assert!(snapshot.entry(4).is_none());
        assert!(snapshot.entry(9).is_none());
    }

    #[test]
    fn test_race_gaps_from_reference_curve() {
        let mut engine = engine(EngineConfig::default());
        let now = Instant::now();

        engine.handle_event(&monza(), now);
        for car in [info(1, 0, 0), info(2, 1, 0), info(3, 2, 0)] {
            engine.handle_event(&BroadcastEvent::EntryListCar(car), now);
        }
        for car in [update(1, 1, 2, 0.5), update(2, 2, 2, 0.3), update(3, 3, 0, 0.6)] {
            engine.handle_event(&BroadcastEvent::CarUpdate(car), now);
        }

        let snapshot = engine
            .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Race, 1000.0, 2)), now)
            .unwrap();
        assert_eq!(snapshot.track, Some(TrackId::Monza));
        assert_eq!(snapshot.focused_car, Some(2));

        let leader = snapshot.entry(1).unwrap();
        assert_eq!(leader.gaps.to_leader, None);
        assert!((secs(leader.gaps.to_focused) + 20.0).abs() < 1e-6);
        assert!((secs(leader.gaps.to_ahead_on_track) - 10.0).abs() < 1e-6);

        let second = snapshot.entry(2).unwrap();
        assert!((secs(second.gaps.to_leader) - 20.0).abs() < 1e-6);
        assert!((secs(second.gaps.to_ahead) - 20.0).abs() < 1e-6);
        assert!((secs(second.gaps.to_ahead_on_track) - 20.0).abs() < 1e-6);
        assert_eq!(second.gaps.to_focused, None);

        let lapped = snapshot.entry(3).unwrap();
        assert_eq!(lapped.gaps.to_leader, Some(Gap::Laps(-1)));
        assert_eq!(lapped.gaps.to_ahead, Some(Gap::Laps(-1)));
        assert_eq!(lapped.gaps.to_ahead_on_track, None);
        // Focused car is behind on track
        assert!((secs(lapped.gaps.to_focused_on_track) + 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_counts_laps_on_line_crossing() {
        let mut engine = engine(EngineConfig::default());
        let now = Instant::now();
        engine.handle_event(&BroadcastEvent::EntryListCar(info(1, 0, 0)), now);

        let mut pit = update(1, 1, 2, 0.95);
        pit.location = CarLocation::Pitlane;
        for car in [update(1, 1, 2, 0.95), update(1, 1, 2, 0.05), pit, update(1, 1, 2, 0.02)] {
            engine.handle_event(&BroadcastEvent::CarUpdate(car), now);
        }

        let snapshot = engine
            .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Race, 1000.0, -1)), now)
            .unwrap();
        // Only the crossing on track counts
        assert_eq!(snapshot.entry(1).unwrap().laps, 3);
    }

    #[test]
    fn test_live_bucket_gaps() {
        let config = EngineConfig {
            gap_policy: GapPolicy::LiveBuckets,
            time_multiplier: 2.0,
            ..EngineConfig::default()
        };
        let mut engine = engine(config);
        let start = Instant::now();

        engine.handle_event(&monza(), start);
        engine.handle_event(&BroadcastEvent::EntryListCar(info(1, 0, 0)), start);
        engine.handle_event(&BroadcastEvent::EntryListCar(info(2, 0, 0)), start);

        // One marker per half second, the second car trails by four markers
        for step in 0..40u64 {
            let now = start + Duration::from_millis(500 * step);
            let lead = 0.105 + step as f64 * 0.01;
            engine.handle_event(&BroadcastEvent::CarUpdate(update(1, 1, 1, lead)), now);
            engine.handle_event(&BroadcastEvent::CarUpdate(update(2, 2, 1, lead - 0.04)), now);
        }

        let snapshot = engine
            .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Race, 1000.0, 2)), start)
            .unwrap();

        // Two seconds on the clock at double time
        assert!((secs(snapshot.entry(2).unwrap().gaps.to_leader) - 1.0).abs() < 1e-6);
        assert!((secs(snapshot.entry(1).unwrap().gaps.to_focused) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_removes_silent_cars() {
        let config = EngineConfig {
            missed_update_limit: 2,
            ..EngineConfig::default()
        };
        let mut engine = engine(config);
        let now = Instant::now();
        engine.handle_event(&BroadcastEvent::EntryListCar(info(1, 0, 0)), now);
        engine.handle_event(&BroadcastEvent::EntryListCar(info(2, 0, 0)), now);

        let mut session_time = 1000.0;
        let mut tick = |engine: &mut LeaderboardEngine, cars: &[u16]| {
            for (index, car_id) in cars.iter().enumerate() {
                let car = update(*car_id, index as u16 + 1, 1, 0.5);
                engine.handle_event(&BroadcastEvent::CarUpdate(car), now);
            }
            session_time += 100.0;
            engine
                .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Race, session_time, -1)), now)
                .unwrap()
        };

        assert_eq!(tick(&mut engine, &[1, 2]).entries.len(), 2);
        assert_eq!(tick(&mut engine, &[1]).entries.len(), 2);
        let snapshot = tick(&mut engine, &[1]);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(engine.tracked_cars(), 1);
    }

    #[test]
    fn test_session_change_resets_cars() {
        let mut engine = engine(EngineConfig::default());
        let now = Instant::now();
        engine.handle_event(&BroadcastEvent::EntryListCar(info(1, 0, 0)), now);
        engine.handle_event(&BroadcastEvent::CarUpdate(update(1, 1, 4, 0.5)), now);

        let first = engine
            .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Race, 5000.0, -1)), now)
            .unwrap();
        assert_eq!(first.entries.len(), 1);

        // Session clock going backwards means a restart
        let restarted = engine
            .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Race, 10.0, -1)), now)
            .unwrap();
        assert!(restarted.entries.is_empty());

        engine.handle_event(&BroadcastEvent::CarUpdate(update(1, 1, 0, 0.1)), now);
        let mut next = session(SessionType::Race, 20.0, -1);
        next.session_index = 2;
        let snapshot = engine.handle_event(&BroadcastEvent::SessionUpdate(next), now).unwrap();
        assert!(snapshot.entries.is_empty());
    }

    #[test]
    fn test_total_spline_ranking_in_race() {
        let config = EngineConfig {
            ranking: RankingOrder::TotalSplinePosition,
            ..EngineConfig::default()
        };
        let mut engine = engine(config);
        let now = Instant::now();
        engine.handle_event(&BroadcastEvent::EntryListCar(info(1, 0, 0)), now);
        engine.handle_event(&BroadcastEvent::EntryListCar(info(2, 0, 0)), now);
        // Official positions lag behind an overtake
        engine.handle_event(&BroadcastEvent::CarUpdate(update(1, 1, 3, 0.40)), now);
        engine.handle_event(&BroadcastEvent::CarUpdate(update(2, 2, 3, 0.45)), now);

        let snapshot = engine
            .handle_event(&BroadcastEvent::SessionUpdate(session(SessionType::Race, 1000.0, -1)), now)
            .unwrap();
        let order: Vec<u16> = snapshot.entries.iter().map(|e| e.car_id).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_run_publishes_snapshots() {
        let engine = engine(EngineConfig::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, mut snapshot_rx) = watch::channel(None);
        let task = tokio::spawn(engine.run(events_rx, snapshot_tx));

        events_tx.send(BroadcastEvent::EntryListCar(info(7, 0, 0))).unwrap();
        events_tx.send(BroadcastEvent::CarUpdate(update(7, 1, 0, 0.2))).unwrap();
        events_tx
            .send(BroadcastEvent::SessionUpdate(session(SessionType::Qualifying, 1000.0, 7)))
            .unwrap();

        snapshot_rx.changed().await.unwrap();
        let snapshot = snapshot_rx.borrow().clone().unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.focused_car, Some(7));

        drop(events_tx);
        task.await.unwrap();
    }
}
