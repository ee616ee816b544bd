//! Position to cumulative time curve of a reference lap

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{Error, Result};
use crate::util::{ms_to_secs, normalize_spline};

/// One recorded point of a reference lap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapSample {
    /// Spline position, before any track offset
    pub position: f64,
    /// Cumulative lap time at this position
    pub time_ms: f64,
    pub speed_kmh: f64,
}

impl LapSample {
    /// Parses records of `position;timeMs;speed`, skipping lines that do not parse
    pub fn parse_lines(text: &str) -> Vec<LapSample> {
        let mut samples = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Self::parse_line(line) {
                Some(sample) => samples.push(sample),
                None => warn!(line = number + 1, content = %line, "skipping malformed lap sample"),
            }
        }
        samples
    }

    fn parse_line(line: &str) -> Option<LapSample> {
        let mut fields = line.split(';').map(str::trim);
        let position = fields.next()?.parse::<f64>().ok()?;
        let time_ms = fields.next()?.parse::<f64>().ok()?;
        let speed_kmh = fields.next().and_then(|f| f.parse::<f64>().ok()).unwrap_or(0.0);

        (position.is_finite() && time_ms.is_finite()).then_some(LapSample {
            position,
            time_ms,
            speed_kmh,
        })
    }
}

/// Monotone linear interpolant from spline position to lap time in seconds
///
/// Built once per track and class, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceCurve {
    positions: Vec<f64>,
    times: Vec<f64>,
    lap_time: f64,
}

impl ReferenceCurve {
    /// Minimum distinct positions needed for interpolation
    pub const MIN_POINTS: usize = 2;

    /// Builds a curve from `(position, seconds)` points in any order
    ///
    /// Points are sorted by position; for duplicate positions the first one wins.
    pub fn from_points(mut points: Vec<(f64, f64)>) -> Result<Self> {
        points.retain(|(p, t)| p.is_finite() && t.is_finite());
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points.dedup_by(|later, earlier| later.0 == earlier.0);

        if points.len() < Self::MIN_POINTS {
            return Err(Error::invalid_curve(format!(
                "need at least {} distinct positions, got {}",
                Self::MIN_POINTS,
                points.len()
            )));
        }

        let lap_time = points.iter().map(|(_, t)| *t).fold(f64::MIN, f64::max);
        let (positions, times) = points.into_iter().unzip();
        Ok(ReferenceCurve {
            positions,
            times,
            lap_time,
        })
    }

    /// Builds a curve from recorded samples, applying the track's spline offset
    pub fn from_samples(samples: &[LapSample], spline_offset: f64) -> Result<Self> {
        let points = samples
            .iter()
            .map(|s| (normalize_spline(s.position, spline_offset), ms_to_secs(s.time_ms)))
            .collect();
        Self::from_points(points)
    }

    /// Time of a full reference lap in seconds
    pub fn lap_time(&self) -> f64 {
        self.lap_time
    }

    /// Cumulative time at `position`, extrapolating beyond the recorded range
    pub fn time_at(&self, position: f64) -> f64 {
        let upper = self
            .positions
            .partition_point(|p| *p <= position)
            .clamp(1, self.positions.len() - 1);
        let lower = upper - 1;

        let (x0, x1) = (self.positions[lower], self.positions[upper]);
        let (y0, y1) = (self.times[lower], self.times[upper]);
        y0 + (position - x0) * (y1 - y0) / (x1 - x0)
    }

    /// Time needed to drive from `from` to `to`, crossing the line if `to < from`
    pub fn time_between(&self, from: f64, to: f64) -> f64 {
        let start = self.time_at(from);
        let end = self.time_at(to);
        if to < from {
            self.lap_time - start + end
        } else {
            end - start
        }
    }
}
