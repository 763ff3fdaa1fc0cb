use chrono::{DateTime, TimeDelta, Utc};

use crate::error::ResolutionError;
use crate::record::ExperimentRecord;

/// Absolute interval handed to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub open_start: DateTime<Utc>,
    pub open_end: DateTime<Utc>,
}

impl ResolvedWindow {
    pub fn start_millis(&self) -> i64 {
        self.open_start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.open_end.timestamp_millis()
    }
}

/// Turns a run's recorded span into a dashboard window.
///
/// The capture tool can stamp the end of a run before trailing backpressure
/// has drained, so the end is pushed out by `correction_margin`. The start is
/// left untouched. Use `record.start`/`record.end` for the unadjusted span.
#[derive(Debug, Clone, Copy)]
pub struct WindowResolver {
    correction_margin: TimeDelta,
}

impl WindowResolver {
    pub fn new(correction_margin: TimeDelta) -> Self {
        Self { correction_margin }
    }

    /// Build a resolver from a margin in (possibly fractional) seconds.
    pub fn from_secs(seconds: f64) -> Result<Self, ResolutionError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ResolutionError::InvalidMargin(seconds));
        }
        let micros = (seconds * 1_000_000.0).round();
        if micros > i64::MAX as f64 {
            return Err(ResolutionError::InvalidMargin(seconds));
        }
        Ok(Self::new(TimeDelta::microseconds(micros as i64)))
    }

    pub fn correction_margin(&self) -> TimeDelta {
        self.correction_margin
    }

    pub fn resolve(&self, record: &ExperimentRecord) -> Result<ResolvedWindow, ResolutionError> {
        // An inverted record stays invalid however large the margin is.
        if record.end <= record.start {
            return Err(ResolutionError::EmptyWindow {
                start: record.start,
                end: record.end,
            });
        }
        let open_start = record.start;
        let open_end = record
            .end
            .checked_add_signed(self.correction_margin)
            .ok_or(ResolutionError::EmptyWindow {
                start: record.start,
                end: record.end,
            })?;
        if open_end <= open_start {
            return Err(ResolutionError::EmptyWindow {
                start: open_start,
                end: open_end,
            });
        }
        Ok(ResolvedWindow {
            open_start,
            open_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, path::PathBuf};

    use chrono::TimeZone;

    fn record(start: DateTime<Utc>, end: DateTime<Utc>) -> ExperimentRecord {
        ExperimentRecord {
            workload: "dhr".into(),
            messages_per_second: 10000,
            n_partitions: 4,
            n_keys: 1000,
            start,
            end,
            duration_seconds: (end - start).num_milliseconds() as f64 / 1000.0,
            declared_duration_seconds: None,
            zipf_const: 0.0,
            epoch_size: None,
            increase_interval: None,
            increase_amount: None,
            n_threads: None,
            storage_path: PathBuf::from("run"),
            is_legacy: false,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn only_the_end_is_extended() {
        let start = Utc.with_ymd_and_hms(2025, 12, 5, 10, 0, 0).unwrap();
        let end = start + TimeDelta::milliseconds(60_250);
        let resolver = WindowResolver::from_secs(15.0).unwrap();
        let window = resolver.resolve(&record(start, end)).unwrap();
        assert_eq!(window.open_start, start);
        assert_eq!(window.open_end, end + TimeDelta::seconds(15));
        assert_eq!(window.end_millis() - window.start_millis(), 75_250);
    }

    #[test]
    fn fractional_margin() {
        let resolver = WindowResolver::from_secs(2.5).unwrap();
        assert_eq!(resolver.correction_margin(), TimeDelta::milliseconds(2500));
    }

    #[test]
    fn negative_margin_is_rejected() {
        assert_eq!(
            WindowResolver::from_secs(-1.0).unwrap_err(),
            ResolutionError::InvalidMargin(-1.0)
        );
        assert!(WindowResolver::from_secs(f64::NAN).is_err());
    }

    #[test]
    fn inverted_record_fails_instead_of_clamping() {
        let start = Utc.with_ymd_and_hms(2025, 12, 5, 10, 0, 0).unwrap();
        let resolver = WindowResolver::from_secs(0.0).unwrap();

        let equal = resolver.resolve(&record(start, start));
        assert!(matches!(equal, Err(ResolutionError::EmptyWindow { .. })));

        let inverted = resolver.resolve(&record(start, start - TimeDelta::seconds(30)));
        assert!(matches!(inverted, Err(ResolutionError::EmptyWindow { .. })));
    }

    #[test]
    fn margin_does_not_rescue_an_inverted_record_silently() {
        let start = Utc.with_ymd_and_hms(2025, 12, 5, 10, 0, 0).unwrap();
        let resolver = WindowResolver::from_secs(15.0).unwrap();
        let inverted = resolver.resolve(&record(start, start - TimeDelta::seconds(2)));
        assert!(matches!(inverted, Err(ResolutionError::EmptyWindow { .. })));
        assert!(resolver.resolve(&record(start, start)).is_err());
    }
}
