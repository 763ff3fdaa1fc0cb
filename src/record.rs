use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;

/// Fixed name of the per-run metadata file.
pub const METADATA_FILE: &str = "metadata.json";

/// On-disk shape of `metadata.json` as written by the workload runner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMetadata {
    pub workload: String,
    pub messages_per_second: u64,
    pub n_partitions: u64,
    pub n_keys: u64,
    pub start: String,
    pub end: String,
    #[serde(rename = "duration (s)", default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub zipf_const: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub epoch_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub increase_interval: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub increase_amount: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub n_threads: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One recorded experiment run. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRecord {
    pub workload: String,
    pub messages_per_second: u64,
    pub n_partitions: u64,
    pub n_keys: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Always `end - start`.
    pub duration_seconds: f64,
    /// The `duration (s)` value the runner wrote, if any.
    pub declared_duration_seconds: Option<f64>,
    pub zipf_const: f64,
    pub epoch_size: Option<u64>,
    pub increase_interval: Option<f64>,
    pub increase_amount: Option<i64>,
    pub n_threads: Option<u64>,
    pub storage_path: PathBuf,
    pub is_legacy: bool,
    pub extra: BTreeMap<String, Value>,
}

impl ExperimentRecord {
    /// Build a record from parsed metadata, checking the record invariants.
    pub fn from_raw(
        raw: RawMetadata,
        storage_path: &Path,
        legacy_prefix: &str,
    ) -> Result<Self, LoadError> {
        let workload = raw.workload.trim().to_string();
        if workload.is_empty() {
            return Err(LoadError::Invariant("workload is empty".into()));
        }
        for (field, value) in [
            ("messages_per_second", raw.messages_per_second),
            ("n_partitions", raw.n_partitions),
            ("n_keys", raw.n_keys),
        ] {
            if value == 0 {
                return Err(LoadError::Invariant(format!("{field} must be positive")));
            }
        }

        let zipf_const = raw.zipf_const.unwrap_or(0.0);
        if !zipf_const.is_finite() || zipf_const < 0.0 {
            return Err(LoadError::Invariant(format!(
                "zipf_const must be non-negative (got {zipf_const})"
            )));
        }

        let start = parse_timestamp("start", &raw.start)?;
        let end = parse_timestamp("end", &raw.end)?;
        if end <= start {
            return Err(LoadError::Invariant(format!(
                "end {} is not after start {}",
                raw.end, raw.start
            )));
        }

        let is_legacy = !legacy_prefix.is_empty()
            && dir_name(storage_path).starts_with(legacy_prefix);

        Ok(Self {
            workload,
            messages_per_second: raw.messages_per_second,
            n_partitions: raw.n_partitions,
            n_keys: raw.n_keys,
            start,
            end,
            duration_seconds: seconds_between(start, end),
            declared_duration_seconds: raw.duration,
            zipf_const,
            epoch_size: raw.epoch_size,
            increase_interval: raw.increase_interval,
            increase_amount: raw.increase_amount,
            n_threads: raw.n_threads,
            storage_path: storage_path.to_path_buf(),
            is_legacy,
            extra: raw.extra,
        })
    }

    /// Directory name of the run, used for display and tie-breaking.
    pub fn dir_name(&self) -> String {
        dir_name(&self.storage_path)
    }

    /// Absolute difference between the declared and the measured duration.
    pub fn duration_drift(&self) -> Option<f64> {
        self.declared_duration_seconds
            .map(|declared| (declared - self.duration_seconds).abs())
    }
}

/// Display-only fields: a value of the wrong shape is dropped, never fatal.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(value) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            debug!(%value, error = %err, "ignoring unusable optional metadata value");
            Ok(None)
        }
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta: TimeDelta = end - start;
    delta.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}

/// Parse an ISO-8601 timestamp. Naive values are taken as host local time.
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, LoadError> {
    let trimmed = value.trim();
    let invalid = || LoadError::InvalidTimestamp {
        field,
        value: value.to_string(),
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| invalid())?;
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(start: &str, end: &str) -> RawMetadata {
        serde_json::from_value(serde_json::json!({
            "workload": "dhr",
            "messages_per_second": 10000,
            "n_partitions": 4,
            "n_keys": 1000,
            "start": start,
            "end": end,
            "duration (s)": 60,
            "zipf_const": 0.0,
        }))
        .unwrap()
    }

    #[test]
    fn rfc3339_timestamps_keep_their_offset() {
        let parsed = parse_timestamp("start", "2025-12-05T14:30:00.250+01:00").unwrap();
        let expected = Utc.with_ymd_and_hms(2025, 12, 5, 13, 30, 0).unwrap()
            + TimeDelta::milliseconds(250);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn naive_timestamps_are_local_time() {
        let parsed = parse_timestamp("start", "2025-12-05T14:30:00.123456").unwrap();
        let expected = Local
            .with_ymd_and_hms(2025, 12, 5, 14, 30, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
            + TimeDelta::microseconds(123_456);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        let err = parse_timestamp("end", "yesterday").unwrap_err();
        assert!(matches!(err, LoadError::InvalidTimestamp { field: "end", .. }));
    }

    #[test]
    fn record_derives_duration_and_legacy_flag() {
        let record = ExperimentRecord::from_raw(
            raw("2025-12-05T14:30:00Z", "2025-12-05T14:31:00.5Z"),
            Path::new("/results/legacy_dhr_10000tps"),
            "legacy_",
        )
        .unwrap();
        assert!(record.is_legacy);
        assert_eq!(record.duration_seconds, 60.5);
        assert_eq!(record.duration_drift(), Some(0.5));
        assert_eq!(record.dir_name(), "legacy_dhr_10000tps");
    }

    #[test]
    fn inverted_window_is_an_invariant_violation() {
        let err = ExperimentRecord::from_raw(
            raw("2025-12-05T14:31:00Z", "2025-12-05T14:30:00Z"),
            Path::new("/results/dhr"),
            "legacy_",
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Invariant(_)));
    }

    #[test]
    fn zero_partitions_is_rejected() {
        let mut metadata = raw("2025-12-05T14:30:00Z", "2025-12-05T14:31:00Z");
        metadata.n_partitions = 0;
        let err = ExperimentRecord::from_raw(metadata, Path::new("/results/dhr"), "legacy_")
            .unwrap_err();
        assert!(err.to_string().contains("n_partitions"));
    }

    #[test]
    fn odd_optional_fields_do_not_reject_the_run() {
        let metadata: RawMetadata = serde_json::from_value(serde_json::json!({
            "workload": "dhr",
            "messages_per_second": 5000,
            "n_partitions": 2,
            "n_keys": 100,
            "start": "2025-12-05T14:30:00Z",
            "end": "2025-12-05T14:31:00Z",
            "increase_interval": 2.5,
            "increase_amount": -500,
            "epoch_size": "large",
            "n_threads": null,
        }))
        .unwrap();
        assert_eq!(metadata.increase_interval, Some(2.5));
        assert_eq!(metadata.increase_amount, Some(-500));
        assert_eq!(metadata.epoch_size, None);
        assert_eq!(metadata.n_threads, None);
    }

    #[test]
    fn unknown_keys_land_in_extra() {
        let metadata: RawMetadata = serde_json::from_value(serde_json::json!({
            "workload": "ycsbt",
            "messages_per_second": 5000,
            "n_partitions": 2,
            "n_keys": 100,
            "start": "2025-12-05T14:30:00Z",
            "end": "2025-12-05T14:31:00Z",
            "snapshot_interval": 10,
        }))
        .unwrap();
        let record =
            ExperimentRecord::from_raw(metadata, Path::new("/results/ycsbt"), "legacy_").unwrap();
        assert_eq!(record.zipf_const, 0.0);
        assert_eq!(record.declared_duration_seconds, None);
        assert_eq!(record.extra.get("snapshot_interval"), Some(&serde_json::json!(10)));
        assert!(!record.is_legacy);
    }
}
