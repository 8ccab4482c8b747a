//! Attendance status classification and debounced recording.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Temperatures at or above this are flagged as an anomaly.
pub const DEFAULT_FEVER_THRESHOLD: f32 = 37.5;

/// Repeat sightings of one identity inside this window produce no new record.
pub const DEFAULT_DEBOUNCE_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Anomaly,
    Unknown,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Anomaly => "Anomaly",
            AttendanceStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown attendance status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for AttendanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(AttendanceStatus::Present),
            "Anomaly" => Ok(AttendanceStatus::Anomaly),
            "Unknown" => Ok(AttendanceStatus::Unknown),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// One attendance event. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
    pub temperature: f32,
}

/// Persistence seam for attendance records.
pub trait AttendanceLog {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Latest record for `identity_id` by timestamp.
    fn most_recent(&self, identity_id: i64) -> Result<Option<AttendanceRecord>, Self::Error>;

    fn insert(&self, record: &AttendanceRecord) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    Recorded(AttendanceStatus),
    /// A record for the same identity exists inside the debounce window.
    Debounced,
}

/// Classifies readings and suppresses duplicate writes.
#[derive(Debug, Clone, Copy)]
pub struct AttendanceRecorder {
    fever_threshold: f32,
    debounce: Duration,
}

impl Default for AttendanceRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_FEVER_THRESHOLD, Duration::seconds(DEFAULT_DEBOUNCE_SECS))
    }
}

impl AttendanceRecorder {
    pub fn new(fever_threshold: f32, debounce: Duration) -> Self {
        Self {
            fever_threshold,
            debounce,
        }
    }

    /// Present below the fever threshold, Anomaly at or above it.
    pub fn classify(&self, temperature: f32) -> AttendanceStatus {
        if temperature < self.fever_threshold {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Anomaly
        }
    }

    /// Record a sighting of `identity_id` at `now` unless one was recorded within the window.
    pub fn record<L: AttendanceLog>(
        &self,
        log: &L,
        identity_id: i64,
        temperature: f32,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, L::Error> {
        if let Some(last) = log.most_recent(identity_id)? {
            if now - last.timestamp < self.debounce {
                tracing::debug!(identity = identity_id, last = %last.timestamp, "attendance debounced");
                return Ok(RecordOutcome::Debounced);
            }
        }

        let status = self.classify(temperature);
        log.insert(&AttendanceRecord {
            identity_id,
            timestamp: now,
            status,
            temperature,
        })?;
        tracing::info!(identity = identity_id, %status, temperature, "attendance recorded");
        Ok(RecordOutcome::Recorded(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::convert::Infallible;

    #[derive(Default)]
    struct MemoryLog {
        records: RefCell<Vec<AttendanceRecord>>,
    }

    impl AttendanceLog for MemoryLog {
        type Error = Infallible;

        fn most_recent(&self, identity_id: i64) -> Result<Option<AttendanceRecord>, Infallible> {
            Ok(self
                .records
                .borrow()
                .iter()
                .filter(|r| r.identity_id == identity_id)
                .max_by_key(|r| r.timestamp)
                .cloned())
        }

        fn insert(&self, record: &AttendanceRecord) -> Result<(), Infallible> {
            self.records.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_classify_threshold() {
        let recorder = AttendanceRecorder::default();
        assert_eq!(recorder.classify(36.2), AttendanceStatus::Present);
        assert_eq!(recorder.classify(37.49), AttendanceStatus::Present);
        assert_eq!(recorder.classify(37.5), AttendanceStatus::Anomaly);
        assert_eq!(recorder.classify(38.0), AttendanceStatus::Anomaly);
    }

    #[test]
    fn test_records_status_and_temperature() {
        let log = MemoryLog::default();
        let recorder = AttendanceRecorder::default();

        assert_eq!(
            recorder.record(&log, 1, 36.2, t0()).unwrap(),
            RecordOutcome::Recorded(AttendanceStatus::Present)
        );
        assert_eq!(
            recorder.record(&log, 2, 38.0, t0()).unwrap(),
            RecordOutcome::Recorded(AttendanceStatus::Anomaly)
        );

        let records = log.records.borrow();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].temperature, 36.2);
        assert_eq!(records[1].status, AttendanceStatus::Anomaly);
    }

    #[test]
    fn test_debounce_within_window() {
        let log = MemoryLog::default();
        let recorder = AttendanceRecorder::default();

        recorder.record(&log, 1, 36.5, t0()).unwrap();
        let again = recorder
            .record(&log, 1, 36.6, t0() + Duration::milliseconds(4_999))
            .unwrap();
        assert_eq!(again, RecordOutcome::Debounced);
        assert_eq!(log.records.borrow().len(), 1);
    }

    #[test]
    fn test_debounce_window_elapsed() {
        let log = MemoryLog::default();
        let recorder = AttendanceRecorder::default();

        recorder.record(&log, 1, 36.5, t0()).unwrap();
        recorder.record(&log, 1, 36.5, t0() + Duration::seconds(5)).unwrap();
        recorder.record(&log, 1, 36.5, t0() + Duration::seconds(12)).unwrap();
        assert_eq!(log.records.borrow().len(), 3);
    }

    #[test]
    fn test_debounce_is_per_identity() {
        let log = MemoryLog::default();
        let recorder = AttendanceRecorder::default();

        recorder.record(&log, 1, 36.5, t0()).unwrap();
        let other = recorder.record(&log, 2, 36.5, t0() + Duration::seconds(1)).unwrap();
        assert!(matches!(other, RecordOutcome::Recorded(_)));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [AttendanceStatus::Present, AttendanceStatus::Anomaly, AttendanceStatus::Unknown] {
            assert_eq!(status.as_str().parse::<AttendanceStatus>().unwrap(), status);
        }
        assert!("Absent".parse::<AttendanceStatus>().is_err());
    }
}
