use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::record::{ExperimentRecord, METADATA_FILE, RawMetadata};

/// A run directory that was left out of the record set.
#[derive(Debug)]
pub struct SkippedRun {
    pub path: PathBuf,
    pub reason: LoadError,
}

/// Outcome of scanning a results root.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Valid records, oldest first.
    pub records: Vec<ExperimentRecord>,
    pub skipped: Vec<SkippedRun>,
    /// Loaded runs whose declared duration disagrees with start/end.
    pub drifted: Vec<PathBuf>,
}

/// Read-only view over a results directory tree.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    legacy_prefix: String,
    duration_tolerance_secs: f64,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, legacy_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            legacy_prefix: legacy_prefix.into(),
            duration_tolerance_secs: 5.0,
        }
    }

    pub fn with_duration_tolerance(mut self, seconds: f64) -> Self {
        self.duration_tolerance_secs = seconds;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every run under the root. Only an unreadable root is an error;
    /// individual runs that fail to load are reported in `skipped`.
    pub fn load(&self) -> Result<LoadReport> {
        let entries = fs::read_dir(&self.root).with_context(|| {
            format!("failed to read results directory {}", self.root.display())
        })?;

        let mut report = LoadReport::default();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("failed to list results directory {}", self.root.display())
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match self.load_run(&path) {
                Ok(record) => {
                    if self.exceeds_tolerance(&record) {
                        report.drifted.push(path);
                    }
                    report.records.push(record);
                }
                Err(reason) => {
                    warn!(path = %path.display(), error = %reason, "skipping experiment run");
                    report.skipped.push(SkippedRun { path, reason });
                }
            }
        }

        report.records.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| a.storage_path.cmp(&b.storage_path))
        });
        report.skipped.sort_by(|a, b| a.path.cmp(&b.path));
        report.drifted.sort();

        debug!(
            root = %self.root.display(),
            loaded = report.records.len(),
            skipped = report.skipped.len(),
            "loaded experiment records"
        );
        Ok(report)
    }

    fn load_run(&self, dir: &Path) -> Result<ExperimentRecord, LoadError> {
        let meta_path = dir.join(METADATA_FILE);
        if !meta_path.is_file() {
            return Err(LoadError::MissingMetadata(meta_path));
        }
        let raw = fs::read_to_string(&meta_path).map_err(|source| LoadError::Unreadable {
            path: meta_path.clone(),
            source,
        })?;
        let metadata: RawMetadata =
            serde_json::from_str(&raw).map_err(|source| LoadError::Malformed {
                path: meta_path.clone(),
                source,
            })?;
        ExperimentRecord::from_raw(metadata, dir, &self.legacy_prefix)
    }

    fn exceeds_tolerance(&self, record: &ExperimentRecord) -> bool {
        let Some(drift) = record.duration_drift() else {
            return false;
        };
        if drift <= self.duration_tolerance_secs {
            return false;
        }
        warn!(
            run = %record.dir_name(),
            declared = record.declared_duration_seconds,
            measured = record.duration_seconds,
            "declared duration disagrees with start/end"
        );
        true
    }
}
