//! Live gaps from the times cars pass fixed markers around the lap

/// Markers per lap
pub const BUCKETS: usize = 100;

/// When a car passed one marker
#[derive(Debug, Clone, Copy, PartialEq)]
struct BucketSample {
    /// Laps plus spline position at the marker
    lap_position: f64,
    /// Seconds on the engine clock
    time: f64,
}

/// Ring of the last time a car passed each 1/100th lap marker
#[derive(Debug, Clone)]
pub struct BucketTracker {
    samples: Vec<Option<BucketSample>>,
    current: Option<usize>,
    /// Laps plus spline position of the latest record
    last_position: f64,
}

impl Default for BucketTracker {
    fn default() -> Self {
        BucketTracker {
            samples: vec![None; BUCKETS],
            current: None,
            last_position: 0.0,
        }
    }
}

impl BucketTracker {
    /// Creates an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker index of a spline position
    pub fn bucket_of(spline: f64) -> usize {
        ((spline * BUCKETS as f64).floor().max(0.0) as usize).min(BUCKETS - 1)
    }

    /// Marker the car passed most recently
    pub fn current_bucket(&self) -> Option<usize> {
        self.current
    }

    /// Records a position, storing a sample whenever the car reaches a new marker
    ///
    /// Markers jumped over are cleared so a stale sample from an earlier lap
    /// is never compared against a fresh one. Moving back a marker keeps the
    /// samples already taken.
    pub fn record(&mut self, spline: f64, laps: u32, time: f64) {
        let bucket = Self::bucket_of(spline);
        let lap_position = f64::from(laps) + spline;
        if self.current == Some(bucket) {
            self.last_position = lap_position;
            return;
        }

        match self.current {
            Some(_) if lap_position <= self.last_position => {
                self.current = Some(bucket);
                self.last_position = lap_position;
                return;
            }
            Some(previous) => {
                let mut skipped = (previous + 1) % BUCKETS;
                while skipped != bucket {
                    self.samples[skipped] = None;
                    skipped = (skipped + 1) % BUCKETS;
                }
            }
            None => {}
        }

        self.samples[bucket] = Some(BucketSample { lap_position, time });
        self.current = Some(bucket);
        self.last_position = lap_position;
    }

    /// Forgets every sample
    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = None);
        self.current = None;
        self.last_position = 0.0;
    }

    /// Seconds since `ahead` passed the latest marker both cars passed on the same lap
    ///
    /// Walks back from this car's current marker. Returns `None` when the
    /// two cars share no marker.
    pub fn time_behind(&self, ahead: &BucketTracker) -> Option<f64> {
        let current = self.current?;
        (0..BUCKETS)
            .map(|back| (current + BUCKETS - back) % BUCKETS)
            .find_map(|bucket| {
                let mine = self.samples[bucket]?;
                let theirs = ahead.samples[bucket]?;
                ((mine.lap_position - theirs.lap_position).abs() < 0.5).then(|| mine.time - theirs.time)
            })
    }
}
