use std::time::{Duration, Instant};

/// Running totals of render and scheduler wait time.
///
/// Accumulated for the whole session and only read for the summary.
#[derive(Debug, Clone, Default)]
pub struct PerfStats {
    frame_count: u64,
    frame_time_total_ms: f64,
    /// Microseconds; negative contributions mean the deadline had passed.
    wait_time_total: i64,
    started: Option<Instant>,
}

impl PerfStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_frame_time(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn end_frame_time(&mut self) {
        if let Some(start) = self.started.take() {
            self.record_frame(start.elapsed());
        }
    }

    pub fn record_frame(&mut self, frame_time: Duration) {
        self.frame_count += 1;
        self.frame_time_total_ms += frame_time.as_secs_f64() * 1000.0;
    }

    pub fn add_wait_time(&mut self, wait_us: i64) {
        self.wait_time_total = self.wait_time_total.saturating_add(wait_us);
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average render time per frame in milliseconds, zero before any frame.
    pub fn avg_frame_time_ms(&self) -> f64 {
        if self.frame_count == 0 {
            return 0.0;
        }
        self.frame_time_total_ms / self.frame_count as f64
    }

    /// Average scheduler wait per frame in microseconds.
    pub fn avg_wait_time_us(&self) -> i64 {
        if self.frame_count == 0 {
            return 0;
        }
        self.wait_time_total / self.frame_count as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_average_to_zero() {
        let stats = PerfStats::new();
        assert_eq!(stats.avg_frame_time_ms(), 0.0);
        assert_eq!(stats.avg_wait_time_us(), 0);
    }

    #[test]
    fn averages_recorded_frames() {
        let mut stats = PerfStats::new();
        stats.record_frame(Duration::from_millis(10));
        stats.record_frame(Duration::from_millis(20));
        stats.add_wait_time(3000);
        stats.add_wait_time(-1000);
        assert_eq!(stats.frame_count(), 2);
        assert!((stats.avg_frame_time_ms() - 15.0).abs() < 1e-9);
        assert_eq!(stats.avg_wait_time_us(), 1000);
    }

    #[test]
    fn end_without_start_is_ignored() {
        let mut stats = PerfStats::new();
        stats.end_frame_time();
        assert_eq!(stats.frame_count(), 0);
        stats.start_frame_time();
        stats.end_frame_time();
        assert_eq!(stats.frame_count(), 1);
        assert!(stats.avg_frame_time_ms() >= 0.0);
    }
}
