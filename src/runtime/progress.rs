//! Progress reporting for batch loads.

use std::fmt;
use std::time::{Duration, Instant};

/// Tracks elapsed time of a batch
#[derive(Debug, Clone)]
pub struct Progress {
    total: usize,
    started: Instant,
}

impl Progress {
    pub fn start(total: usize) -> Self {
        Self {
            total,
            started: Instant::now(),
        }
    }

    /// Snapshot after `completed` records
    pub fn tick(&self, completed: usize) -> ProgressLine {
        ProgressLine::new(completed, self.total, self.started.elapsed())
    }
}

/// One progress report: `index/total`, elapsed and estimated remaining time, percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressLine {
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub percent: f64,
}

impl ProgressLine {
    /// Extrapolate the remaining time from the average time per completed record
    pub fn new(completed: usize, total: usize, elapsed: Duration) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            completed as f64 * 100.0 / total as f64
        };
        let remaining = if completed == 0 || completed >= total {
            Duration::ZERO
        } else {
            elapsed.mul_f64((total - completed) as f64 / completed as f64)
        };

        Self {
            completed,
            total,
            elapsed,
            remaining,
            percent,
        }
    }
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} elapsed {:.1}s remaining {:.1}s ({:.1}%)",
            self.completed,
            self.total,
            self.elapsed.as_secs_f64(),
            self.remaining.as_secs_f64(),
            self.percent
        )
    }
}
