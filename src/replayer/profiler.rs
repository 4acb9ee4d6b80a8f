use std::fmt;

/// Accumulated result of a run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub total_ticks: u64,
    pub total_dispatches: u64,
    /// Timestamp ticks per second.
    pub timestamp_frequency: f64,
    /// `None` when no dispatch was ever drained.
    pub per_dispatch_us: Option<f64>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total ticks: {}", self.total_ticks)?;
        writeln!(f, "Total dispatches: {}", self.total_dispatches)?;
        match self.per_dispatch_us {
            Some(us) => write!(f, "Time per dispatch: {:.3} us", us),
            None => write!(f, "Time per dispatch: n/a (no dispatches retired)"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Profiler {
    total_ticks: u64,
    total_dispatches: u64,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates `(begin, end)` pairs laid out as consecutive values.
    pub fn drain(&mut self, timestamps: &[u64]) {
        for pair in timestamps.chunks_exact(2) {
            self.total_ticks += pair[1].saturating_sub(pair[0]);
            self.total_dispatches += 1;
        }
    }

    pub fn total_dispatches(&self) -> u64 {
        self.total_dispatches
    }

    pub fn summary(&self, timestamp_frequency: f64) -> RunSummary {
        let per_dispatch_us = (self.total_dispatches > 0 && timestamp_frequency > 0.0).then(|| {
            self.total_ticks as f64 / self.total_dispatches as f64 * 1e6 / timestamp_frequency
        });

        RunSummary {
            total_ticks: self.total_ticks,
            total_dispatches: self.total_dispatches,
            timestamp_frequency,
            per_dispatch_us,
        }
    }
}
