//! SQLite persistence layer
//!
//! One rollup database per machine (tables `hour_avr` and `day_avr`) and
//! one shared anomaly database (table `anomaly`). Statements run on the
//! blocking pool so a slow disk never stalls the async runtime.

use super::{AnomalyStore, RollupStore};
use crate::error::{MonitorError, Result};
use crate::models::{AnomalyEvent, RollupRecord};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Upper bound for one statement, lock wait included
pub const PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to a single SQLite connection
#[derive(Clone)]
struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MonitorError::PersistenceFailure(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn execute_sync<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MonitorError::PersistenceFailure(format!("lock poisoned: {}", e)))?;
        Ok(f(&conn)?)
    }

    async fn execute<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = self.clone();
        let task = tokio::task::spawn_blocking(move || db.execute_sync(f));
        match tokio::time::timeout(PERSISTENCE_TIMEOUT, task).await {
            Ok(joined) => joined.map_err(|e| MonitorError::PersistenceFailure(e.to_string()))?,
            Err(_) => Err(MonitorError::PersistenceFailure(format!(
                "timed out after {}ms",
                PERSISTENCE_TIMEOUT.as_millis()
            ))),
        }
    }
}

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RollupRecord> {
    Ok(RollupRecord {
        timestamp: row.get(0)?,
        avg_left: row.get(1)?,
        avg_right: row.get(2)?,
        avg_temp: row.get(3)?,
    })
}

/// Rollup store for one machine
#[derive(Clone)]
pub struct SqliteRollupStore {
    db: Db,
}

impl SqliteRollupStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            db: Db::open(path.as_ref())?,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            db: Db::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.db.execute_sync(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS hour_avr (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    time TIMESTAMP NOT NULL,
                    left_vib REAL NOT NULL,
                    right_vib REAL NOT NULL,
                    temperature REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS day_avr (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    time TIMESTAMP NOT NULL,
                    left_vib REAL NOT NULL,
                    right_vib REAL NOT NULL,
                    temperature REAL NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_hour_avr_time ON hour_avr(time);
                CREATE INDEX IF NOT EXISTS idx_day_avr_time ON day_avr(time);
                "#,
            )
        })
    }

    async fn insert(&self, table: &'static str, record: RollupRecord) -> Result<()> {
        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {} (time, left_vib, right_vib, temperature) VALUES (?1, ?2, ?3, ?4)",
                        table
                    ),
                    params![
                        record.timestamp,
                        record.avg_left,
                        record.avg_right,
                        record.avg_temp
                    ],
                )
            })
            .await?;
        debug!(table, "Rollup row inserted");
        Ok(())
    }
}

#[async_trait]
impl RollupStore for SqliteRollupStore {
    async fn save_hour_rollup(&self, record: RollupRecord) -> Result<()> {
        self.insert("hour_avr", record).await
    }

    async fn save_day_rollup(&self, record: RollupRecord) -> Result<()> {
        self.insert("day_avr", record).await
    }

    async fn get_day_average(&self, date: NaiveDate) -> Result<Option<RollupRecord>> {
        let day = date.format("%Y-%m-%d").to_string();
        let (count, averages): (i64, Option<(f64, f64, f64)>) = self
            .db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*), AVG(left_vib), AVG(right_vib), AVG(temperature)
                     FROM hour_avr WHERE DATE(time) = ?1",
                    params![day],
                    |row| {
                        let count: i64 = row.get(0)?;
                        let left: Option<f64> = row.get(1)?;
                        let right: Option<f64> = row.get(2)?;
                        let temp: Option<f64> = row.get(3)?;
                        let averages = match (left, right, temp) {
                            (Some(l), Some(r), Some(t)) => Some((l, r, t)),
                            _ => None,
                        };
                        Ok((count, averages))
                    },
                )
            })
            .await?;

        if count == 0 {
            return Ok(None);
        }

        Ok(averages.map(|(left, right, temp)| RollupRecord {
            timestamp: date.and_time(NaiveTime::MIN),
            avg_left: left,
            avg_right: right,
            avg_temp: temp,
        }))
    }

    async fn hourly_for_day(&self, date: NaiveDate) -> Result<Vec<RollupRecord>> {
        let day = date.format("%Y-%m-%d").to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT time, left_vib, right_vib, temperature
                     FROM hour_avr WHERE DATE(time) = ?1 ORDER BY time",
                )?;
                let rows = stmt.query_map(params![day], read_record)?;
                rows.collect()
            })
            .await
    }

    async fn daily_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RollupRecord>> {
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.format("%Y-%m-%d").to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT time, left_vib, right_vib, temperature
                     FROM day_avr WHERE DATE(time) >= ?1 AND DATE(time) <= ?2 ORDER BY time",
                )?;
                let rows = stmt.query_map(params![start, end], read_record)?;
                rows.collect()
            })
            .await
    }
}

/// Anomaly event store shared by all machines
#[derive(Clone)]
pub struct SqliteAnomalyStore {
    db: Db,
}

impl SqliteAnomalyStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            db: Db::open(path.as_ref())?,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            db: Db::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.db.execute_sync(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS anomaly (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    time TIMESTAMP NOT NULL,
                    name TEXT NOT NULL,
                    score REAL NOT NULL,
                    threshold REAL NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_anomaly_time ON anomaly(time DESC);
                "#,
            )
        })
    }
}

#[async_trait]
impl AnomalyStore for SqliteAnomalyStore {
    async fn save_anomaly(&self, event: AnomalyEvent) -> Result<()> {
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO anomaly (time, name, score, threshold) VALUES (?1, ?2, ?3, ?4)",
                    params![event.timestamp, event.machine_name, event.score, event.threshold],
                )
            })
            .await?;
        Ok(())
    }

    async fn recent_anomalies(&self, limit: usize) -> Result<Vec<AnomalyEvent>> {
        let limit = limit as i64;
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT time, name, score, threshold FROM anomaly
                     ORDER BY time DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |row| {
                    let timestamp: NaiveDateTime = row.get(0)?;
                    Ok(AnomalyEvent {
                        timestamp,
                        machine_name: row.get(1)?,
                        score: row.get(2)?,
                        threshold: row.get(3)?,
                    })
                })?;
                rows.collect()
            })
            .await
    }
}
