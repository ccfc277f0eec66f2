//! In-memory stores

use super::{average_records, AnomalyStore, RollupStore};
use crate::error::Result;
use crate::models::{AnomalyEvent, RollupRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

/// Rollup store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryRollupStore {
    hourly: RwLock<Vec<RollupRecord>>,
    daily: RwLock<Vec<RollupRecord>>,
}

impl MemoryRollupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn hourly(&self) -> Vec<RollupRecord> {
        self.hourly.read().await.clone()
    }

    pub async fn daily(&self) -> Vec<RollupRecord> {
        self.daily.read().await.clone()
    }
}

#[async_trait]
impl RollupStore for MemoryRollupStore {
    async fn save_hour_rollup(&self, record: RollupRecord) -> Result<()> {
        self.hourly.write().await.push(record);
        Ok(())
    }

    async fn save_day_rollup(&self, record: RollupRecord) -> Result<()> {
        self.daily.write().await.push(record);
        Ok(())
    }

    async fn get_day_average(&self, date: NaiveDate) -> Result<Option<RollupRecord>> {
        let records = self.hourly_for_day(date).await?;
        Ok(average_records(date, &records))
    }

    async fn hourly_for_day(&self, date: NaiveDate) -> Result<Vec<RollupRecord>> {
        let mut records: Vec<RollupRecord> = self
            .hourly
            .read()
            .await
            .iter()
            .filter(|r| r.timestamp.date() == date)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn daily_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RollupRecord>> {
        let mut records: Vec<RollupRecord> = self
            .daily
            .read()
            .await
            .iter()
            .filter(|r| r.timestamp.date() >= start && r.timestamp.date() <= end)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

/// Anomaly store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryAnomalyStore {
    events: RwLock<Vec<AnomalyEvent>>,
}

impl MemoryAnomalyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AnomalyEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AnomalyStore for MemoryAnomalyStore {
    async fn save_anomaly(&self, event: AnomalyEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn recent_anomalies(&self, limit: usize) -> Result<Vec<AnomalyEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}
