//! Hourly and daily rollups of raw readings
//!
//! Each machine owns one [`RollupAccumulator`]. Raw readings feed three
//! running statistics; every incoming sample asks the boundary detector
//! whether the hour or day has turned, and if so the accumulated means are
//! written out and the statistics start over.

use crate::clock::{BoundaryDetector, Clock};
use crate::error::Result;
use crate::models::RollupRecord;
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::statistics::RunningStatistic;
use crate::storage::RollupStore;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-machine rollup state
pub struct RollupAccumulator {
    machine: String,
    left: RunningStatistic,
    right: RunningStatistic,
    temp: RunningStatistic,
    detector: BoundaryDetector,
    store: Arc<dyn RollupStore>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl RollupAccumulator {
    pub fn new(machine: impl Into<String>, store: Arc<dyn RollupStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            machine: machine.into(),
            left: RunningStatistic::new(),
            right: RunningStatistic::new(),
            temp: RunningStatistic::new(),
            detector: BoundaryDetector::new(clock),
            store,
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Feed raw left/right vibration readings, then check boundaries
    ///
    /// Returns true when the call closed a window and persisted it.
    pub async fn add_vib(&mut self, left: &[f64], right: &[f64]) -> Result<bool> {
        self.left.add(left);
        self.right.add(right);
        self.trigger().await
    }

    /// Feed raw temperature readings, then check boundaries
    pub async fn add_temp(&mut self, data: &[f64]) -> Result<bool> {
        self.temp.add(data);
        self.trigger().await
    }

    /// Sample counts currently accumulated (left, right, temp)
    #[cfg(test)]
    pub fn pending_counts(&self) -> (u64, u64, u64) {
        (self.left.count(), self.right.count(), self.temp.count())
    }

    async fn trigger(&mut self) -> Result<bool> {
        if self.detector.is_day_boundary_crossed() {
            // Move the hour reference too; the hour rollup below covers it
            self.detector.is_hour_boundary_crossed();

            let day = self.save_day_rollup().await;
            let hour = self.save_hour_rollup().await;
            day.and(hour).map(|()| true)
        } else if self.detector.is_hour_boundary_crossed() {
            self.save_hour_rollup().await.map(|()| true)
        } else {
            Ok(false)
        }
    }

    /// Persist yesterday's average of already stored hourly rows, if any
    async fn save_day_rollup(&self) -> Result<()> {
        let yesterday = self.detector.clock().today() - Duration::days(1);

        let record = match self.store.get_day_average(yesterday).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(machine = %self.machine, day = %yesterday, "No hourly rollups for day, skipping");
                return Ok(());
            }
            Err(e) => {
                self.metrics.inc_persistence_errors();
                return Err(e);
            }
        };

        if let Err(e) = self.store.save_day_rollup(record).await {
            self.metrics.inc_persistence_errors();
            return Err(e);
        }

        self.metrics.inc_rollups_saved(&self.machine, "day");
        self.logger.log_day_rollup(&self.machine, &yesterday.to_string());
        Ok(())
    }

    /// Drain all three statistics and persist their means.
    ///
    /// All three are drained even when one of them is empty, so a failed
    /// rollup never leaks readings into the next window.
    async fn save_hour_rollup(&mut self) -> Result<()> {
        let averages = (
            self.left.get_average(),
            self.right.get_average(),
            self.temp.get_average(),
        );
        let record = match averages {
            (Ok(avg_left), Ok(avg_right), Ok(avg_temp)) => RollupRecord {
                timestamp: self.detector.clock().now(),
                avg_left,
                avg_right,
                avg_temp,
            },
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                warn!(machine = %self.machine, error = %e, "Hour closed with an empty channel, rollup skipped");
                return Err(e);
            }
        };

        let (left, right, temp) = (record.avg_left, record.avg_right, record.avg_temp);
        if let Err(e) = self.store.save_hour_rollup(record).await {
            self.metrics.inc_persistence_errors();
            return Err(e);
        }

        self.metrics.inc_rollups_saved(&self.machine, "hour");
        self.logger.log_hour_rollup(&self.machine, left, right, temp);
        Ok(())
    }
}
