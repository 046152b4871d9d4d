use std::collections::VecDeque;
use std::time::Duration;

/// Latency samples kept for the rolling average.
const LATENCY_WINDOW: usize = 100;

/// Hit/miss counters and a rolling latency window for fetches.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    hits: u64,
    misses: u64,
    deduplicated: u64,
    errors: u64,
    retries: u64,
    latencies: VecDeque<Duration>,
}

/// Point-in-time copy of [`FetchMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub deduplicated: u64,
    pub errors: u64,
    pub retries: u64,
    pub hit_rate: f64,
    pub avg_latency: Duration,
}

impl FetchMetrics {
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_dedup(&mut self) {
        self.deduplicated += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    /// Share of lookups served from cache (0.0–1.0). 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn average_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.latencies.iter().sum();
        sum / self.latencies.len() as u32
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits,
            misses: self.misses,
            deduplicated: self.deduplicated,
            errors: self.errors,
            retries: self.retries,
            hit_rate: self.hit_rate(),
            avg_latency: self.average_latency(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(FetchMetrics::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let mut m = FetchMetrics::default();
        m.record_hit();
        m.record_hit();
        m.record_hit();
        m.record_miss();
        assert!((m.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut m = FetchMetrics::default();
        for _ in 0..LATENCY_WINDOW {
            m.record_latency(Duration::from_millis(1000));
        }
        for _ in 0..LATENCY_WINDOW {
            m.record_latency(Duration::from_millis(10));
        }
        assert_eq!(m.average_latency(), Duration::from_millis(10));
    }

    #[test]
    fn test_average_latency() {
        let mut m = FetchMetrics::default();
        m.record_latency(Duration::from_millis(100));
        m.record_latency(Duration::from_millis(300));
        assert_eq!(m.average_latency(), Duration::from_millis(200));
    }
}
