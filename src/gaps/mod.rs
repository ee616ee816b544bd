//! Gap and ranking module
//!
//! This module turns realtime car updates into ranked leaderboards with time
//! gaps between cars.

pub mod buckets;
pub mod engine;

pub use self::buckets::BucketTracker;
pub use self::engine::{GapResult, LeaderboardEngine, LeaderboardEntry, LeaderboardSnapshot};

use serde::{Deserialize, Serialize};

use crate::core::CarClass;
use crate::track::ReferenceStore;
use crate::util::relative_spline_position;

/// Gap from one car to another
///
/// Time gaps are positive when the other car is ahead. Lap gaps are
/// negative when this car is that many laps down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gap {
    /// Seconds
    Time(f64),
    /// Whole laps
    Laps(i32),
}

impl Gap {
    /// Seconds of a time gap
    pub fn as_secs(&self) -> Option<f64> {
        match self {
            Gap::Time(secs) => Some(*secs),
            Gap::Laps(_) => None,
        }
    }
}

/// Where a car is, as far as gap calculation is concerned
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub class: CarClass,
    /// Completed laps plus spline position
    pub total: f64,
    /// Spline position in `[0, 1)`
    pub spline: f64,
}

/// Lap gap when `distance` laps separate two cars, `None` below one lap
///
/// `distance` is positive when the other car is ahead.
pub fn laps_apart(distance: f64) -> Option<Gap> {
    if distance >= 1.0 {
        Some(Gap::Laps(-(distance.floor() as i32)))
    } else if distance <= -1.0 {
        Some(Gap::Laps((-distance).floor() as i32))
    } else {
        None
    }
}

/// Gap from `this` to `other` using reference laps
///
/// The leading car's curve measures how long the trailing car needs to reach
/// its position. Without any curve the distance is driven at
/// `fallback_speed_kmh`.
pub fn reference_gap(
    this: &TrackPosition,
    other: &TrackPosition,
    store: &ReferenceStore,
    fallback_speed_kmh: f64,
) -> Gap {
    let distance = other.total - this.total;
    if let Some(laps) = laps_apart(distance) {
        return laps;
    }
    Gap::Time(time_to_cover(this, other, distance, store, fallback_speed_kmh))
}

/// Gap from `this` to `other` by their positions on track, ignoring laps
pub fn on_track_gap(
    this: &TrackPosition,
    other: &TrackPosition,
    store: &ReferenceStore,
    fallback_speed_kmh: f64,
) -> Gap {
    let relative = relative_spline_position(other.spline, this.spline);
    Gap::Time(time_to_cover(this, other, relative, store, fallback_speed_kmh))
}

/// Gap between two best laps, `None` unless both cars have one
pub fn best_lap_gap(this_best: Option<f64>, other_best: Option<f64>) -> Option<Gap> {
    Some(Gap::Time(this_best? - other_best?))
}

/// Signed time for the trailing car to reach the leading one over `distance` laps
fn time_to_cover(
    this: &TrackPosition,
    other: &TrackPosition,
    distance: f64,
    store: &ReferenceStore,
    fallback_speed_kmh: f64,
) -> f64 {
    if distance == 0.0 {
        return 0.0;
    }

    let (behind, ahead, sign) = if distance > 0.0 {
        (this, other, 1.0)
    } else {
        (other, this, -1.0)
    };

    match store.curve(ahead.class).or_else(|_| store.curve(behind.class)) {
        Ok(curve) => sign * curve.time_between(behind.spline, ahead.spline),
        Err(_) => store.constant_speed_time(distance, fallback_speed_kmh),
    }
}
