//! Reference curves for every class on the current track

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::{CarClass, Error, Result, TrackId};
use super::curve::{LapSample, ReferenceCurve};

/// Provider of recorded reference laps
pub trait LapDataSource: Send + Sync {
    /// Returns the recorded lap of `class` on `track`, if there is one
    fn samples(&self, track: TrackId, class: CarClass) -> Result<Option<Vec<LapSample>>>;
}

/// Reads `<dir>/<track>_<class>.txt` files
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    /// Creates a source reading from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectorySource { dir: dir.into() }
    }

    /// File holding the reference lap of `class` on `track`
    pub fn path_for(&self, track: TrackId, class: CarClass) -> PathBuf {
        self.dir.join(format!("{}_{}.txt", track, class))
    }

    /// Directory the source reads from
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LapDataSource for DirectorySource {
    fn samples(&self, track: TrackId, class: CarClass) -> Result<Option<Vec<LapSample>>> {
        let path = self.path_for(track, class);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(LapSample::parse_lines(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Source without any recorded laps
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLapData;

impl LapDataSource for NoLapData {
    fn samples(&self, _track: TrackId, _class: CarClass) -> Result<Option<Vec<LapSample>>> {
        Ok(None)
    }
}

/// Curve used for a class, and which class recorded it
#[derive(Debug, Clone)]
struct ResolvedCurve {
    curve: Arc<ReferenceCurve>,
    recorded_by: CarClass,
}

/// Per-class reference curves of one track
///
/// Classes without a recorded lap borrow the curve of the first class in
/// their replacement list that has one.
#[derive(Debug, Clone)]
pub struct ReferenceStore {
    track: TrackId,
    track_meters: f64,
    curves: HashMap<CarClass, ResolvedCurve>,
}

impl ReferenceStore {
    /// Store without any curves
    pub fn empty(track: TrackId, track_meters: f64) -> Self {
        ReferenceStore {
            track,
            track_meters,
            curves: HashMap::new(),
        }
    }

    /// Loads every class's recorded lap and resolves replacements
    pub fn load(source: &dyn LapDataSource, track: TrackId, track_meters: f64) -> Self {
        let mut store = Self::empty(track, track_meters);

        for class in CarClass::ALL {
            match load_curve(source, track, class) {
                Ok(curve) => {
                    info!(%track, %class, "built reference curve");
                    store.insert(class, curve);
                }
                Err(Error::ReferenceCurveNotFound { .. }) => {
                    debug!(%track, %class, "no recorded reference lap");
                }
                Err(e) => warn!(%track, %class, error = %e, "failed to build reference curve"),
            }
        }

        for class in CarClass::ALL {
            if store.curves.contains_key(&class) {
                continue;
            }
            let replacement = class
                .replacements()
                .iter()
                .find_map(|r| store.curves.get(r).filter(|c| c.recorded_by == *r).cloned());
            match replacement {
                Some(resolved) => {
                    info!(%track, %class, from = %resolved.recorded_by, "using replacement reference curve");
                    store.curves.insert(class, resolved);
                }
                None => warn!(%track, %class, "no reference curve, gaps use constant speed"),
            }
        }

        store
    }

    /// Adds the recorded curve of `class`
    pub fn insert(&mut self, class: CarClass, curve: ReferenceCurve) {
        self.curves.insert(
            class,
            ResolvedCurve {
                curve: Arc::new(curve),
                recorded_by: class,
            },
        );
    }

    /// Track the curves belong to
    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Track length in meters
    pub fn track_meters(&self) -> f64 {
        self.track_meters
    }

    /// Curve for `class`, possibly borrowed from a replacement class
    pub fn curve(&self, class: CarClass) -> Result<&ReferenceCurve> {
        self.curves
            .get(&class)
            .map(|resolved| resolved.curve.as_ref())
            .ok_or(Error::ReferenceCurveNotFound {
                track: self.track,
                class,
            })
    }

    /// Class whose recorded lap backs the curve of `class`
    pub fn recorded_by(&self, class: CarClass) -> Option<CarClass> {
        self.curves.get(&class).map(|resolved| resolved.recorded_by)
    }

    /// Time to cover `distance` laps at a constant speed
    pub fn constant_speed_time(&self, distance: f64, speed_kmh: f64) -> f64 {
        distance * self.track_meters / (speed_kmh / 3.6)
    }
}

/// Builds the curve recorded for exactly `class`
pub fn load_curve(source: &dyn LapDataSource, track: TrackId, class: CarClass) -> Result<ReferenceCurve> {
    let samples = source
        .samples(track, class)?
        .ok_or(Error::ReferenceCurveNotFound { track, class })?;
    ReferenceCurve::from_samples(&samples, track.spline_offset())
}
