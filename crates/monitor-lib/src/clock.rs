//! Wall-clock access and calendar boundary detection
//!
//! A [`BoundaryDetector`] reports whether the local calendar day or hour
//! has advanced since it was last asked. Each query moves the detector's
//! reference point, so two consecutive queries within the same hour both
//! report no change.

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use std::sync::{Arc, Mutex};

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Clock backed by the system's local time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Stateful day/hour change detector; one instance per owner
pub struct BoundaryDetector {
    clock: Arc<dyn Clock>,
    last_day: NaiveDate,
    last_hour: (NaiveDate, u32),
}

impl BoundaryDetector {
    /// Create a detector whose reference point is the current time
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            clock,
            last_day: now.date(),
            last_hour: (now.date(), now.hour()),
        }
    }

    /// True if the calendar day changed since the previous day query
    pub fn is_day_boundary_crossed(&mut self) -> bool {
        let today = self.clock.today();
        let crossed = today != self.last_day;
        self.last_day = today;
        crossed
    }

    /// True if the calendar hour changed since the previous hour query
    pub fn is_hour_boundary_crossed(&mut self) -> bool {
        let now = self.clock.now();
        let hour = (now.date(), now.hour());
        let crossed = hour != self.last_hour;
        self.last_hour = hour;
        crossed
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_no_boundary_within_same_hour() {
        let clock = Arc::new(ManualClock::new(at(1, 10, 0)));
        let mut detector = BoundaryDetector::new(clock.clone());

        clock.set(at(1, 10, 59));
        assert!(!detector.is_day_boundary_crossed());
        assert!(!detector.is_hour_boundary_crossed());
    }

    #[test]
    fn test_hour_boundary_reported_once() {
        let clock = Arc::new(ManualClock::new(at(1, 10, 30)));
        let mut detector = BoundaryDetector::new(clock.clone());

        clock.advance(Duration::minutes(45));
        assert!(detector.is_hour_boundary_crossed());
        assert!(!detector.is_hour_boundary_crossed());
    }

    #[test]
    fn test_day_boundary_reported_once() {
        let clock = Arc::new(ManualClock::new(at(1, 23, 50)));
        let mut detector = BoundaryDetector::new(clock.clone());

        clock.set(at(2, 0, 5));
        assert!(detector.is_day_boundary_crossed());
        assert!(!detector.is_day_boundary_crossed());
        assert_eq!(detector.last_day, at(2, 0, 0).date());
    }

    #[test]
    fn test_same_hour_on_next_day_is_an_hour_boundary() {
        let clock = Arc::new(ManualClock::new(at(1, 10, 0)));
        let mut detector = BoundaryDetector::new(clock.clone());

        clock.set(at(2, 10, 0));
        assert!(detector.is_hour_boundary_crossed());
    }

    #[test]
    fn test_day_and_hour_references_are_independent() {
        let clock = Arc::new(ManualClock::new(at(1, 23, 0)));
        let mut detector = BoundaryDetector::new(clock.clone());

        clock.set(at(2, 0, 0));
        assert!(detector.is_day_boundary_crossed());
        // The hour reference was not touched by the day query
        assert!(detector.is_hour_boundary_crossed());
    }
}
