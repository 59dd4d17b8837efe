use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{CycleStats, PerformanceSummary, RunningStats};

/// Collects per-cycle timing and turns it into running and final statistics.
///
/// Wall time is measured on the tokio clock so paused-time tests see the
/// same numbers as the loop itself.
#[derive(Debug)]
pub struct PerformanceReporter {
    loop_start: Instant,
    started_at: DateTime<Utc>,
    history: Vec<CycleStats>,
    successful: u64,
    successful_time: Duration,
}

impl PerformanceReporter {
    pub fn new() -> Self {
        Self {
            loop_start: Instant::now(),
            started_at: Utc::now(),
            history: Vec::new(),
            successful: 0,
            successful_time: Duration::ZERO,
        }
    }

    /// Restart the wall clock and clear previous cycles.
    pub fn start(&mut self) {
        *self = Self::new();
    }

    pub fn record(&mut self, stats: CycleStats) -> RunningStats {
        if stats.success {
            self.successful += 1;
            self.successful_time += stats.duration;
        }
        self.history.push(stats);
        self.running_at(Instant::now())
    }

    pub fn running_at(&self, now: Instant) -> RunningStats {
        let avg_latency_ms = self.avg_latency_ms();
        RunningStats {
            attempted: self.history.len() as u64,
            successful: self.successful,
            avg_latency_ms,
            avg_fps: fps_from_latency(avg_latency_ms),
            overall_fps: self.overall_fps(now),
        }
    }

    pub fn summarize(&self) -> PerformanceSummary {
        self.summarize_at(Instant::now())
    }

    pub fn summarize_at(&self, now: Instant) -> PerformanceSummary {
        let attempted = self.history.len() as u64;
        let avg_latency_ms = self.avg_latency_ms();
        let success_rate_percent = if attempted > 0 {
            self.successful as f64 / attempted as f64 * 100.0
        } else {
            0.0
        };

        PerformanceSummary {
            attempted,
            successful: self.successful,
            success_rate_percent,
            avg_latency_ms,
            avg_fps: fps_from_latency(avg_latency_ms),
            overall_fps: self.overall_fps(now),
            median_latency_ms: self.median_latency_ms(),
            total_runtime_s: now.saturating_duration_since(self.loop_start).as_secs_f64(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.successful == 0 {
            return 0.0;
        }
        millis(self.successful_time) / self.successful as f64
    }

    fn overall_fps(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.loop_start).as_secs_f64();
        if elapsed > 0.0 {
            self.successful as f64 / elapsed
        } else {
            0.0
        }
    }

    fn median_latency_ms(&self) -> Option<f64> {
        let mut latencies: Vec<f64> = self
            .history
            .iter()
            .filter(|s| s.success)
            .map(|s| millis(s.duration))
            .collect();
        if latencies.len() < 2 {
            return None;
        }
        latencies.sort_by(|a, b| a.total_cmp(b));

        let mid = latencies.len() / 2;
        if latencies.len() % 2 == 0 {
            Some((latencies[mid - 1] + latencies[mid]) / 2.0)
        } else {
            Some(latencies[mid])
        }
    }
}

impl Default for PerformanceReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

fn fps_from_latency(latency_ms: f64) -> f64 {
    if latency_ms > 0.0 {
        1000.0 / latency_ms
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(step: u64, ms: u64, success: bool) -> CycleStats {
        CycleStats {
            step,
            duration: Duration::from_millis(ms),
            success,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_average_matches_mean() {
        let mut reporter = PerformanceReporter::new();
        let latencies = [12u64, 40, 33, 7, 58, 21];

        let mut last = None;
        for (i, ms) in latencies.iter().enumerate() {
            last = Some(reporter.record(cycle(i as u64, *ms, true)));
        }

        let mean = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
        let running = last.unwrap();
        assert!((running.avg_latency_ms - mean).abs() < 1e-9);
        assert!((running.avg_fps - 1000.0 / mean).abs() < 1e-9);
        assert_eq!(running.attempted, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_count_as_attempted_only() {
        let mut reporter = PerformanceReporter::new();
        reporter.record(cycle(0, 10, true));
        reporter.record(cycle(1, 900, false));
        let running = reporter.record(cycle(2, 30, true));

        assert_eq!(running.attempted, 3);
        assert_eq!(running.successful, 2);
        assert!((running.avg_latency_ms - 20.0).abs() < 1e-9);

        let summary = reporter.summarize();
        assert!((summary.success_rate_percent - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.median_latency_ms, Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_fps_uses_wall_time() {
        let mut reporter = PerformanceReporter::new();
        reporter.start();
        for step in 0..10 {
            reporter.record(cycle(step, 5, true));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let summary = reporter.summarize();
        assert!((summary.overall_fps - 5.0).abs() < 1e-6);
        assert!((summary.total_runtime_s - 2.0).abs() < 1e-6);
        assert_eq!(summary.median_latency_ms, Some(5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_median_needs_two_successes() {
        let mut reporter = PerformanceReporter::new();
        reporter.record(cycle(0, 15, true));
        reporter.record(cycle(1, 99, false));
        assert_eq!(reporter.summarize().median_latency_ms, None);

        reporter.record(cycle(2, 25, true));
        reporter.record(cycle(3, 50, true));
        assert_eq!(reporter.summarize().median_latency_ms, Some(25.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_summary() {
        let reporter = PerformanceReporter::new();
        let summary = reporter.summarize();

        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert_eq!(summary.success_rate_percent, 0.0);
        assert!(summary.to_string().contains("No successful iterations completed"));
    }
}
