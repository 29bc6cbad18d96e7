use std::time::Duration;

/// Ring buffer of recent compute pass durations.
#[derive(Debug)]
pub struct PassTimer {
    history: Vec<Duration>,
    index: usize,
    filled: bool,
    total_passes: u64,
}

impl PassTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: vec![Duration::ZERO; capacity.max(1)],
            index: 0,
            filled: false,
            total_passes: 0,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.history.len();
        if self.index == 0 {
            self.filled = true;
        }
        self.total_passes += 1;
    }

    fn recorded(&self) -> &[Duration] {
        if self.filled {
            &self.history
        } else {
            &self.history[..self.index]
        }
    }

    pub fn average(&self) -> Duration {
        let recorded = self.recorded();
        if recorded.is_empty() {
            return Duration::ZERO;
        }
        recorded.iter().sum::<Duration>() / recorded.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.recorded().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recorded().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    /// Most recent pass, if any.
    pub fn last(&self) -> Option<Duration> {
        if self.total_passes == 0 {
            return None;
        }
        let len = self.history.len();
        Some(self.history[(self.index + len - 1) % len])
    }

    pub fn count(&self) -> usize {
        self.recorded().len()
    }

    pub fn total_passes(&self) -> u64 {
        self.total_passes
    }
}

/// Snapshot of an observable area's worker timing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AreaStats {
    pub passes: u64,
    pub last: Duration,
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl From<&PassTimer> for AreaStats {
    fn from(timer: &PassTimer) -> Self {
        Self {
            passes: timer.total_passes(),
            last: timer.last().unwrap_or(Duration::ZERO),
            average: timer.average(),
            min: timer.min(),
            max: timer.max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_timer_tracks_history() {
        let mut timer = PassTimer::new(3);
        assert_eq!(timer.last(), None);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.min(), Duration::from_millis(10));
        assert_eq!(timer.last(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn pass_timer_wraps_around() {
        let mut timer = PassTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), Duration::from_millis(25));
        assert_eq!(timer.total_passes(), 3);

        let stats = AreaStats::from(&timer);
        assert_eq!(stats.passes, 3);
        assert_eq!(stats.last, Duration::from_millis(30));
    }
}
