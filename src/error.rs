//! Failure taxonomy for the run lookup pipeline.
//!
//! Only a broken results root is fatal to the process. Everything here is
//! recovered or reported by the stage that raises it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A single experiment directory could not be turned into a record.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("metadata file {0} is missing")]
    MissingMetadata(PathBuf),

    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field} timestamp '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("invalid record: {0}")]
    Invariant(String),
}

/// Interactive or explicit selection could not settle on a record.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("selection {index} is out of range (1..={len})")]
    OutOfRange { index: usize, len: usize },

    #[error("no valid selection after {0} attempts")]
    TooManyAttempts(u32),

    #[error("failed to read selection: {0}")]
    Input(String),
}

/// The selected record cannot produce a usable dashboard window.
#[derive(Error, Debug, PartialEq)]
pub enum ResolutionError {
    #[error("window {start} .. {end} is empty or inverted")]
    EmptyWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("correction margin {0}s is not a usable duration")]
    InvalidMargin(f64),
}

/// The browser could not be opened; the caller falls back to printing the URL.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("no browser opener found (set BROWSER or browser.command)")]
    NoOpener,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}")]
    Failed { program: String, code: Option<i32> },
}

/// External cluster script failures. Any of these aborts the remaining flow.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("no {0} script configured (set scripts.{0})")]
    NotConfigured(&'static str),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}")]
    NonZeroExit { program: String, code: Option<i32> },
}
