use std::cmp::Reverse;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt};

use crate::config::{TraceFileSettings, project_dirs};

const TRACE_PREFIX: &str = "runscope-";
const TRACE_SUFFIX: &str = ".jsonl";

static TRACE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static ACTIVE_TRACE_FILE: OnceCell<PathBuf> = OnceCell::new();

/// Install the console subscriber, plus a JSON trace file when enabled.
///
/// The console honours `RUST_LOG` and `--verbose`; the trace file always
/// records runscope at debug level so a session can be replayed afterwards.
pub fn init_tracing(verbose: bool, traces: &TraceFileSettings) -> Result<()> {
    let default_level = if verbose {
        "runscope=debug"
    } else {
        "runscope=info"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let trace_file = match open_trace_file(traces)? {
        Some((file, path)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = TRACE_GUARD.set(guard);
            let _ = ACTIVE_TRACE_FILE.set(path);
            Some(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(writer)
                    .with_filter(EnvFilter::new("runscope=debug")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(trace_file)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Trace file written by this process, if any.
pub fn current_trace_file() -> Option<&'static PathBuf> {
    ACTIVE_TRACE_FILE.get()
}

fn open_trace_file(settings: &TraceFileSettings) -> Result<Option<(File, PathBuf)>> {
    if !settings.enabled {
        return Ok(None);
    }

    let directory = match &settings.directory {
        Some(dir) => dir.clone(),
        None => project_dirs()?.cache_dir().join("traces"),
    };
    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create trace directory {}", directory.display()))?;

    let path = directory.join(trace_file_name());
    let file = File::create(&path)
        .with_context(|| format!("Failed to open trace file {}", path.display()))?;
    prune_old_traces(&directory, settings.max_files, &path)?;
    Ok(Some((file, path)))
}

/// One file per invocation; the pid keeps back-to-back runs apart.
fn trace_file_name() -> String {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    format!("{TRACE_PREFIX}{timestamp}-{}{TRACE_SUFFIX}", process::id())
}

fn is_trace_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(TRACE_PREFIX) && name.ends_with(TRACE_SUFFIX))
}

/// Keep at most `max_files` session traces, counting `active`. Zero keeps all.
fn prune_old_traces(directory: &Path, max_files: usize, active: &Path) -> Result<()> {
    if max_files == 0 {
        return Ok(());
    }

    let mut older: Vec<_> = fs::read_dir(directory)
        .with_context(|| format!("Failed to read trace directory {}", directory.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path != active && is_trace_file(path))
        .filter_map(|path| {
            let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok()?;
            Some((modified, path))
        })
        .collect();

    older.sort_by_key(|(modified, _)| Reverse(*modified));
    for (_, path) in older.into_iter().skip(max_files.saturating_sub(1)) {
        if let Err(err) = fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %err, "could not prune trace file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn prune_keeps_newest_sessions_and_foreign_files() {
        let temp = tempdir().unwrap();
        let dir = temp.path();
        for i in 0..4 {
            fs::write(dir.join(format!("{TRACE_PREFIX}{i}{TRACE_SUFFIX}")), "{}").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        fs::write(dir.join("other.jsonl"), "").unwrap();
        let active = dir.join(trace_file_name());
        fs::write(&active, "").unwrap();

        prune_old_traces(dir, 3, &active).unwrap();

        let remaining = names(dir);
        assert!(remaining.contains(&"other.jsonl".to_string()));
        assert!(remaining.contains(&active.file_name().unwrap().to_string_lossy().into_owned()));
        assert!(remaining.contains(&format!("{TRACE_PREFIX}3{TRACE_SUFFIX}")));
        assert!(remaining.contains(&format!("{TRACE_PREFIX}2{TRACE_SUFFIX}")));
        assert!(!remaining.contains(&format!("{TRACE_PREFIX}0{TRACE_SUFFIX}")));
        assert_eq!(remaining.len(), 4);
    }

    #[test]
    fn enabled_trace_file_lands_in_configured_directory() {
        let temp = tempdir().unwrap();
        let settings = TraceFileSettings {
            enabled: true,
            directory: Some(temp.path().join("traces")),
            max_files: 2,
        };
        let (_, path) = open_trace_file(&settings).unwrap().unwrap();
        assert!(path.starts_with(temp.path().join("traces")));
        assert!(is_trace_file(&path));
    }

    #[test]
    fn disabled_trace_file_opens_nothing() {
        let settings = TraceFileSettings::default();
        assert!(open_trace_file(&settings).unwrap().is_none());
    }
}
