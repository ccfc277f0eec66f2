//! Raw telemetry archive
//!
//! Every raw message is appended to a per-day CSV file,
//! `<raw_dir>/<kind>_<YYYY-MM-DD>.csv`. Channels are transposed so each
//! row holds one sample index, prefixed by the message `time`. When the
//! day turns, the previous files of that kind are handed off to the
//! external directory.

use crate::clock::{BoundaryDetector, Clock};
use crate::error::Result;
use crate::models::{SensorEvent, TempMessage, VibMessage};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

const VIB_HEADER: [&str; 5] = [
    "time",
    "machine1_left",
    "machine1_right",
    "machine2_left",
    "machine2_right",
];
const TEMP_HEADER: [&str; 3] = ["time", "machine1", "machine2"];

/// Daily CSV files for one message kind
struct DailyCsv {
    kind: &'static str,
    header: &'static [&'static str],
    detector: BoundaryDetector,
}

impl DailyCsv {
    fn new(kind: &'static str, header: &'static [&'static str], clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            header,
            detector: BoundaryDetector::new(clock),
        }
    }

    fn file_name(&self) -> String {
        format!(
            "{}_{}.csv",
            self.kind,
            self.detector.clock().today().format("%Y-%m-%d")
        )
    }

    fn append(&self, path: &Path, time: &str, channels: &[&[f64]]) -> Result<usize> {
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(self.header)?;
        }

        // Rows stop at the shortest channel
        let rows = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        for i in 0..rows {
            let mut record = Vec::with_capacity(channels.len() + 1);
            record.push(time.to_string());
            record.extend(channels.iter().map(|c| c[i].to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(rows)
    }
}

/// Appends raw events to CSV and rotates them out daily
pub struct RawArchiver {
    raw_dir: PathBuf,
    external_dir: Option<PathBuf>,
    vib: DailyCsv,
    temp: DailyCsv,
}

impl RawArchiver {
    pub fn new(raw_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            external_dir: None,
            vib: DailyCsv::new("vib", &VIB_HEADER, clock.clone()),
            temp: DailyCsv::new("temp", &TEMP_HEADER, clock),
        }
    }

    /// Directory that receives the previous day's files
    pub fn with_external_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.external_dir = Some(dir.into());
        self
    }

    pub fn archive(&mut self, event: &SensorEvent) -> Result<()> {
        match event {
            SensorEvent::Vib(message) => self.archive_vib(message),
            SensorEvent::Temp(message) => self.archive_temp(message),
        }
    }

    pub fn archive_vib(&mut self, message: &VibMessage) -> Result<()> {
        fs::create_dir_all(&self.raw_dir)?;
        if self.vib.detector.is_day_boundary_crossed() {
            self.hand_off(self.vib.kind);
        }

        let path = self.raw_dir.join(self.vib.file_name());
        let rows = self.vib.append(
            &path,
            &message.time,
            &[
                &message.machine1_left,
                &message.machine1_right,
                &message.machine2_left,
                &message.machine2_right,
            ],
        )?;
        debug!(path = ?path, rows, "Archived vibration message");
        Ok(())
    }

    pub fn archive_temp(&mut self, message: &TempMessage) -> Result<()> {
        fs::create_dir_all(&self.raw_dir)?;
        if self.temp.detector.is_day_boundary_crossed() {
            self.hand_off(self.temp.kind);
        }

        let path = self.raw_dir.join(self.temp.file_name());
        let rows = self.temp.append(
            &path,
            &message.time,
            &[&message.machine1, &message.machine2],
        )?;
        debug!(path = ?path, rows, "Archived temperature message");
        Ok(())
    }

    /// Move every file of `kind` to the external directory
    ///
    /// Failures are logged; the files stay in place and go with the next
    /// hand-off.
    fn hand_off(&self, kind: &str) {
        let Some(external) = self.external_dir.as_deref().filter(|d| d.is_dir()) else {
            error!(
                kind,
                external_dir = ?self.external_dir,
                "External directory does not exist, raw files not handed off"
            );
            return;
        };

        let entries = match fs::read_dir(&self.raw_dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = ?self.raw_dir, error = %e, "Failed to list raw directory");
                return;
            }
        };

        let prefix = format!("{kind}_");
        let mut moved = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let dest = external.join(&name);
            match move_file(&entry.path(), &dest) {
                Ok(()) => moved += 1,
                Err(e) => error!(file = ?entry.path(), error = %e, "Failed to move raw file"),
            }
        }

        info!(kind, moved, dest = ?external, "Handed off raw files");
    }
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    fs::copy(src, dest)?;
    fs::remove_file(src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(23, 50, 0)
                .unwrap(),
        ))
    }

    fn vib() -> VibMessage {
        VibMessage {
            time: "2024-03-01 23:50:00".to_string(),
            machine1_left: vec![0.5, 0.25],
            machine1_right: vec![1.0, 2.0],
            machine2_left: vec![3.0, 4.0],
            machine2_right: vec![5.0, 6.0],
        }
    }

    #[test]
    fn test_vib_rows_are_transposed_with_header() {
        let dir = TempDir::new().unwrap();
        let mut archiver = RawArchiver::new(dir.path().join("raw"), clock());

        archiver.archive_vib(&vib()).unwrap();
        archiver.archive_vib(&vib()).unwrap();

        let contents = fs::read_to_string(dir.path().join("raw/vib_2024-03-01.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "time,machine1_left,machine1_right,machine2_left,machine2_right");
        assert_eq!(lines[1], "2024-03-01 23:50:00,0.5,1,3,5");
        assert_eq!(lines[2], "2024-03-01 23:50:00,0.25,2,4,6");
    }

    #[test]
    fn test_temp_rows_stop_at_shortest_channel() {
        let dir = TempDir::new().unwrap();
        let mut archiver = RawArchiver::new(dir.path(), clock());

        let message = TempMessage {
            time: "t0".to_string(),
            machine1: vec![21.5, 21.6, 21.7],
            machine2: vec![30.0, 30.1],
        };
        archiver.archive(&SensorEvent::Temp(message)).unwrap();

        let contents = fs::read_to_string(dir.path().join("temp_2024-03-01.csv")).unwrap();
        assert_eq!(contents, "time,machine1,machine2\nt0,21.5,30\nt0,21.6,30.1\n");
    }

    #[test]
    fn test_day_change_hands_off_files() {
        let dir = TempDir::new().unwrap();
        let external = TempDir::new().unwrap();
        let clock = clock();
        let mut archiver =
            RawArchiver::new(dir.path(), clock.clone()).with_external_dir(external.path());

        archiver.archive_vib(&vib()).unwrap();
        clock.advance(Duration::minutes(20));
        archiver.archive_vib(&vib()).unwrap();

        assert!(external.path().join("vib_2024-03-01.csv").exists());
        assert!(!dir.path().join("vib_2024-03-01.csv").exists());
        assert!(dir.path().join("vib_2024-03-02.csv").exists());
    }

    #[test]
    fn test_missing_external_dir_keeps_files() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let mut archiver = RawArchiver::new(dir.path(), clock.clone())
            .with_external_dir(dir.path().join("does-not-exist"));

        archiver.archive_vib(&vib()).unwrap();
        clock.advance(Duration::minutes(20));
        archiver.archive_vib(&vib()).unwrap();

        assert!(dir.path().join("vib_2024-03-01.csv").exists());
        assert!(dir.path().join("vib_2024-03-02.csv").exists());
    }

    #[test]
    fn test_kinds_rotate_independently() {
        let dir = TempDir::new().unwrap();
        let external = TempDir::new().unwrap();
        let clock = clock();
        let mut archiver =
            RawArchiver::new(dir.path(), clock.clone()).with_external_dir(external.path());

        archiver.archive_vib(&vib()).unwrap();
        archiver
            .archive_temp(&TempMessage {
                time: "t0".to_string(),
                machine1: vec![1.0],
                machine2: vec![2.0],
            })
            .unwrap();
        clock.advance(Duration::minutes(20));
        archiver.archive_vib(&vib()).unwrap();

        // Only the vib stream has seen the new day
        assert!(external.path().join("vib_2024-03-01.csv").exists());
        assert!(dir.path().join("temp_2024-03-01.csv").exists());
    }
}
