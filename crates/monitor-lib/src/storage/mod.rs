//! Persistence for rollups and anomaly events
//!
//! This module provides:
//! - Storage traits the pipeline writes through
//! - SQLite-backed stores for production
//! - In-memory stores for tests and database-less runs

mod memory;
mod sqlite;

pub use memory::{MemoryAnomalyStore, MemoryRollupStore};
pub use sqlite::{SqliteAnomalyStore, SqliteRollupStore};

use crate::error::Result;
use crate::models::{AnomalyEvent, RollupRecord};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Storage for one machine's hourly and daily rollups
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Persist one hourly rollup
    async fn save_hour_rollup(&self, record: RollupRecord) -> Result<()>;

    /// Persist one daily rollup
    async fn save_day_rollup(&self, record: RollupRecord) -> Result<()>;

    /// Average of the hourly rollups persisted for `date`, or `None` if
    /// there are none. The returned timestamp is midnight of `date`.
    async fn get_day_average(&self, date: NaiveDate) -> Result<Option<RollupRecord>>;

    /// Hourly rollups for one day, oldest first
    async fn hourly_for_day(&self, date: NaiveDate) -> Result<Vec<RollupRecord>>;

    /// Daily rollups in the inclusive date range, oldest first
    async fn daily_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RollupRecord>>;
}

/// Storage for anomaly events across all machines
#[async_trait]
pub trait AnomalyStore: Send + Sync {
    async fn save_anomaly(&self, event: AnomalyEvent) -> Result<()>;

    /// Most recent events first
    async fn recent_anomalies(&self, limit: usize) -> Result<Vec<AnomalyEvent>>;
}

/// Average the given hourly records into a day rollup stamped at midnight
pub(crate) fn average_records(date: NaiveDate, records: &[RollupRecord]) -> Option<RollupRecord> {
    if records.is_empty() {
        return None;
    }

    let n = records.len() as f64;
    Some(RollupRecord {
        timestamp: date.and_time(chrono::NaiveTime::MIN),
        avg_left: records.iter().map(|r| r.avg_left).sum::<f64>() / n,
        avg_right: records.iter().map(|r| r.avg_right).sum::<f64>() / n,
        avg_temp: records.iter().map(|r| r.avg_temp).sum::<f64>() / n,
    })
}
