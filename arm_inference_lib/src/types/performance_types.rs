use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timing of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Zero-based cycle index
    pub step: u64,
    pub duration: Duration,
    pub success: bool,
}

/// Aggregates after the most recent cycle, used for the per-step log line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStats {
    pub attempted: u64,
    pub successful: u64,
    /// Mean successful-cycle latency in milliseconds (0 until a cycle succeeds)
    pub avg_latency_ms: f64,
    /// Frame rate implied by `avg_latency_ms`
    pub avg_fps: f64,
    /// Successful cycles per second of wall time since the loop started
    pub overall_fps: f64,
}

/// Terminal report emitted once when the loop drains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub attempted: u64,
    pub successful: u64,
    pub success_rate_percent: f64,
    pub avg_latency_ms: f64,
    pub avg_fps: f64,
    pub overall_fps: f64,
    /// Only present with at least two successful cycles
    pub median_latency_ms: Option<f64>,
    pub total_runtime_s: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "FINAL PERFORMANCE SUMMARY")?;
        writeln!(f, "{}", rule)?;

        if self.successful == 0 {
            writeln!(f, "Total steps attempted: {}", self.attempted)?;
            writeln!(f, "No successful iterations completed")?;
            writeln!(f, "Total runtime: {:.1}s", self.total_runtime_s)?;
        } else {
            writeln!(f, "Total steps attempted: {}", self.attempted)?;
            writeln!(f, "Successful steps: {}", self.successful)?;
            writeln!(f, "Success rate: {:.1}%", self.success_rate_percent)?;
            writeln!(f, "Average iteration time: {:.1}ms", self.avg_latency_ms)?;
            writeln!(f, "Average processing FPS: {:.1}", self.avg_fps)?;
            writeln!(f, "Overall throughput FPS: {:.1}", self.overall_fps)?;
            writeln!(f, "Total runtime: {:.1}s", self.total_runtime_s)?;
            if let Some(median) = self.median_latency_ms {
                writeln!(f, "Median iteration time: {:.1}ms", median)?;
            }
        }

        write!(f, "{}", rule)
    }
}
