//! Running mean of absolute values
//!
//! Accumulates a count and a sum of absolute readings between rollups.
//! Reading the average drains the accumulator.

use crate::error::{MonitorError, Result};

/// Sum of absolute values and sample count since the last drain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStatistic {
    sum_abs: f64,
    count: u64,
}

impl RunningStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of readings; an empty slice is a no-op
    pub fn add(&mut self, values: &[f64]) {
        self.sum_abs += values.iter().map(|v| v.abs()).sum::<f64>();
        self.count += values.len() as u64;
    }

    /// Mean of the absolute values seen since the last call, then reset.
    ///
    /// Fails with [`MonitorError::DivisionByZero`] when no samples were added.
    /// Not idempotent: a second call without an intervening `add` fails.
    pub fn get_average(&mut self) -> Result<f64> {
        if self.count == 0 {
            return Err(MonitorError::DivisionByZero);
        }

        let average = self.sum_abs / self.count as f64;
        self.reset();
        Ok(average)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn reset(&mut self) {
        self.sum_abs = 0.0;
        self.count = 0;
    }
}
