//! Per-session logging span and timing collector

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::Span;

/// Context created once per session and handed to every component
#[derive(Debug, Clone)]
pub struct SessionContext {
    span: Span,
    timings: Arc<Timings>,
}

impl SessionContext {
    /// Creates a context logging under `span`
    pub fn new(span: Span) -> Self {
        SessionContext {
            span,
            timings: Arc::new(Timings::default()),
        }
    }

    /// Creates a context with a span named after the session
    pub fn named(name: &str) -> Self {
        Self::new(tracing::info_span!("session", name = %name))
    }

    /// Span all session diagnostics are recorded under
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Shared timing collector
    pub fn timings(&self) -> &Arc<Timings> {
        &self.timings
    }

    /// Starts a stopwatch recorded under `name` when dropped
    pub fn time(&self, name: &'static str) -> TimingGuard {
        TimingGuard {
            name,
            started: Instant::now(),
            timings: Arc::clone(&self.timings),
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(Span::none())
    }
}

/// Aggregated samples of one named stopwatch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl TimingStats {
    /// Mean sample duration
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.total / self.count as u32
    }
}

/// Collector of named stopwatch samples
#[derive(Debug, Default)]
pub struct Timings {
    samples: Mutex<HashMap<&'static str, TimingStats>>,
}

impl Timings {
    /// Records one sample
    pub fn record(&self, name: &'static str, elapsed: Duration) {
        let Ok(mut samples) = self.samples.lock() else {
            return;
        };
        let stats = samples.entry(name).or_default();
        stats.count += 1;
        stats.total += elapsed;
        stats.max = stats.max.max(elapsed);
    }

    /// Returns the stats of one stopwatch
    pub fn get(&self, name: &str) -> Option<TimingStats> {
        self.samples.lock().ok()?.get(name).copied()
    }

    /// Returns every stopwatch, sorted by name
    pub fn snapshot(&self) -> Vec<(&'static str, TimingStats)> {
        let mut all: Vec<_> = match self.samples.lock() {
            Ok(samples) => samples.iter().map(|(name, stats)| (*name, *stats)).collect(),
            Err(_) => Vec::new(),
        };
        all.sort_by_key(|(name, _)| *name);
        all
    }
}

/// Records the time since creation into [`Timings`] on drop
#[must_use = "the sample is recorded when the guard is dropped"]
pub struct TimingGuard {
    name: &'static str,
    started: Instant,
    timings: Arc<Timings>,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        self.timings.record(self.name, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_records_sample() {
        let ctx = SessionContext::default();
        {
            let _guard = ctx.time("engine.update");
        }
        {
            let _guard = ctx.time("engine.update");
        }

        let stats = ctx.timings().get("engine.update").unwrap();
        assert_eq!(stats.count, 2);
        assert!(stats.max <= stats.total);
    }

    #[test]
    fn test_clones_share_timings() {
        let ctx = SessionContext::named("test");
        let clone = ctx.clone();
        clone.timings().record("decode", Duration::from_micros(40));

        let snapshot = ctx.timings().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "decode");
        assert_eq!(snapshot[0].1.mean(), Duration::from_micros(40));
    }
}
