pub mod cli;
pub mod cluster;
pub mod command;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod filter;
pub mod logging;
pub mod record;
pub mod select;
pub mod store;
pub mod window;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, info_span, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{LaunchRequest, Settings, default_config_path};
use crate::dashboard::{DashboardLauncher, LaunchOutcome, Launcher};
use crate::error::{LaunchError, ResolutionError, SelectionError};
use crate::filter::{FilterToken, parse_tokens};
use crate::record::ExperimentRecord;
use crate::select::{Choice, Disambiguator, SelectionInput};
use crate::store::{LoadReport, RecordStore, SkippedRun};
use crate::window::{ResolvedWindow, WindowResolver};

/// Per-invocation context: settings plus the record set, loaded once and
/// never mutated afterwards.
pub struct Session {
    settings: Settings,
    results_dir: PathBuf,
    records: Vec<ExperimentRecord>,
    skipped: Vec<SkippedRun>,
    dashboard: DashboardLauncher,
    id: Uuid,
}

/// How one pass through the pipeline ended.
#[derive(Debug)]
pub enum FlowOutcome {
    Launched {
        run: String,
        url: Url,
        window: ResolvedWindow,
        matched: usize,
    },
    /// The browser failed; `url` must be shown to the operator.
    PrintedFallback {
        run: String,
        url: Url,
        error: LaunchError,
        matched: usize,
    },
    NoMatches {
        tokens: Vec<FilterToken>,
    },
    Cancelled,
    SelectionAborted(SelectionError),
    ResolutionFailed {
        run: String,
        error: ResolutionError,
    },
}

impl FlowOutcome {
    /// Whether the operator may be offered another pick from the same list.
    pub fn can_repeat(&self) -> bool {
        match self {
            FlowOutcome::Launched { matched, .. }
            | FlowOutcome::PrintedFallback { matched, .. } => *matched > 1,
            _ => false,
        }
    }
}

impl Session {
    /// Load settings from the given or default config path.
    pub fn bootstrap_settings(
        config_path_override: Option<PathBuf>,
    ) -> Result<(Settings, PathBuf)> {
        let config_path = match config_path_override {
            Some(path) => path,
            None => default_config_path()?,
        };
        let settings = Settings::load_or_default(&config_path)?;
        Ok((settings, config_path))
    }

    /// Scan the results root and build the context. Fails only if the root
    /// itself cannot be read or the settings are unusable.
    pub fn open(settings: Settings, results_override: Option<PathBuf>) -> Result<Self> {
        settings.validate()?;
        let results_dir = results_override.unwrap_or_else(|| settings.results_dir.clone());
        let dashboard = DashboardLauncher::new(settings.dashboard.clone())?;
        let store = RecordStore::new(&results_dir, settings.legacy_prefix.clone())
            .with_duration_tolerance(settings.duration_tolerance_secs);
        let LoadReport {
            records, skipped, ..
        } = store.load().with_context(|| {
            format!("Unable to load experiment runs from {}", results_dir.display())
        })?;

        let id = Uuid::new_v4();
        info!(
            session = %id,
            root = %results_dir.display(),
            records = records.len(),
            skipped = skipped.len(),
            "indexed experiment runs"
        );

        Ok(Self {
            settings,
            results_dir,
            records,
            skipped,
            dashboard,
            id,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn results_dir(&self) -> &PathBuf {
        &self.results_dir
    }

    /// All loaded records, oldest first.
    pub fn records(&self) -> &[ExperimentRecord] {
        &self.records
    }

    pub fn skipped(&self) -> &[SkippedRun] {
        &self.skipped
    }

    /// Records matching every token, in load order.
    pub fn matches<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<&ExperimentRecord> {
        filter::filter(&self.records, &parse_tokens(tokens))
    }

    /// Resolver honouring a per-invocation margin override.
    pub fn resolver(&self, margin_secs: Option<f64>) -> Result<WindowResolver, ResolutionError> {
        let seconds = margin_secs.unwrap_or(self.settings.window.correction_margin_secs);
        WindowResolver::from_secs(seconds)
    }

    pub fn dashboard(&self) -> &DashboardLauncher {
        &self.dashboard
    }

    /// Run filter, choose, resolve and launch once.
    pub fn run(
        &self,
        request: &LaunchRequest,
        input: &mut dyn SelectionInput,
        launcher: &mut dyn Launcher,
    ) -> FlowOutcome {
        let span = info_span!(
            "session.run",
            session = %self.id,
            tokens = ?request.tokens,
            pick = ?request.pick
        );
        let _span_guard = span.enter();

        let tokens = parse_tokens(request.tokens.as_slice());
        let subset = filter::filter(&self.records, &tokens);
        let matched = subset.len();
        info!(matched, "filtered experiment runs");

        let chooser = Disambiguator::new(self.settings.selection.max_attempts);
        let choice = match request.pick {
            Some(index) => chooser.pick(&subset, index),
            None => chooser.choose(&subset, input),
        };
        let record = match choice {
            Ok(Choice::Selected(record)) => record,
            Ok(Choice::NoMatch) => return FlowOutcome::NoMatches { tokens },
            Ok(Choice::Cancelled) => return FlowOutcome::Cancelled,
            Err(error) => {
                warn!(error = %error, "selection aborted");
                return FlowOutcome::SelectionAborted(error);
            }
        };
        let run = record.dir_name();

        let window = match self
            .resolver(request.margin_secs)
            .and_then(|resolver| resolver.resolve(record))
        {
            Ok(window) => window,
            Err(error) => {
                warn!(run = %run, error = %error, "cannot resolve dashboard window");
                return FlowOutcome::ResolutionFailed { run, error };
            }
        };

        let identity = self.settings.dashboard.identity_for(record.is_legacy);
        match self.dashboard.launch(&window, &identity, launcher) {
            LaunchOutcome::Opened(url) => FlowOutcome::Launched {
                run,
                url,
                window,
                matched,
            },
            LaunchOutcome::Fallback { url, error } => FlowOutcome::PrintedFallback {
                run,
                url,
                error,
                matched,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DashboardIdentity;
    use crate::dashboard::RecordingLauncher;
    use crate::select::LineInput;
    use crate::store::fixtures::{write_run, write_run_with};
    use chrono::TimeDelta;
    use std::{fs, io::Cursor};
    use tempfile::{TempDir, tempdir};

    fn results() -> TempDir {
        let temp = tempdir().unwrap();
        let runs = [
            ("dhr_10000tps_a", "dhr", 10000, "2025-12-05T10:00:00Z", "2025-12-05T10:01:00.250Z"),
            ("dhr_5000tps", "dhr", 5000, "2025-12-05T11:00:00Z", "2025-12-05T11:01:00Z"),
            ("ycsbt_10000tps", "ycsbt", 10000, "2025-12-05T12:00:00Z", "2025-12-05T12:01:00Z"),
            ("dhr_10000tps_b", "dhr", 10000, "2025-12-05T13:00:00Z", "2025-12-05T13:01:00Z"),
        ];
        for (name, workload, tps, start, end) in runs {
            write_run(temp.path(), name, workload, tps, start, end);
        }
        write_run_with(
            temp.path(),
            "legacy_dhr",
            "dhr",
            2000,
            2,
            "2025-12-04T09:00:00Z",
            "2025-12-04T09:02:00Z",
        );
        temp
    }

    fn session(root: &TempDir) -> Session {
        Session::open(Settings::default(), Some(root.path().to_path_buf())).unwrap()
    }

    fn replies(text: &str) -> LineInput<Cursor<Vec<u8>>, Vec<u8>> {
        LineInput::new(Cursor::new(text.as_bytes().to_vec()), Vec::new())
    }

    fn request(tokens: &[&str]) -> LaunchRequest {
        LaunchRequest {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            ..LaunchRequest::default()
        }
    }

    #[test]
    fn load_then_resolve_extends_only_the_end() {
        let root = results();
        let session = session(&root);
        let margin = session.settings().window.correction_margin_secs;
        let resolver = session.resolver(None).unwrap();
        for record in session.records() {
            let window = resolver.resolve(record).unwrap();
            assert_eq!(window.open_start, record.start);
            assert_eq!(
                window.open_end,
                record.end + TimeDelta::milliseconds((margin * 1000.0) as i64)
            );
        }
    }

    #[test]
    fn single_match_launches_without_prompt() {
        let root = results();
        let session = session(&root);
        let mut launcher = RecordingLauncher::default();
        let outcome = session.run(&request(&["ycsbt"]), &mut replies(""), &mut launcher);
        match outcome {
            FlowOutcome::Launched { run, url, matched, .. } => {
                assert_eq!(run, "ycsbt_10000tps");
                assert_eq!(matched, 1);
                assert_eq!(launcher.opened, vec![url]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn workload_and_rate_select_the_right_pair() {
        let root = results();
        let session = session(&root);
        let names: Vec<_> = session
            .matches(&["dhr", "10000tps"])
            .iter()
            .map(|record| record.dir_name())
            .collect();
        assert_eq!(names, ["dhr_10000tps_a", "dhr_10000tps_b"]);
    }

    #[test]
    fn no_match_never_opens_a_browser() {
        let root = results();
        let session = session(&root);
        let mut launcher = RecordingLauncher::default();
        let outcome = session.run(&request(&["tpcc"]), &mut replies("1\n"), &mut launcher);
        assert!(matches!(outcome, FlowOutcome::NoMatches { .. }));
        assert!(launcher.opened.is_empty());
    }

    #[test]
    fn prompt_index_follows_start_order() {
        let root = results();
        let session = session(&root);
        let mut launcher = RecordingLauncher::default();
        let outcome = session.run(
            &request(&["dhr", "10000tps"]),
            &mut replies("2\n"),
            &mut launcher,
        );
        match outcome {
            FlowOutcome::Launched { run, matched, .. } => {
                assert_eq!(run, "dhr_10000tps_b");
                assert_eq!(matched, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn cancel_skips_launch() {
        let root = results();
        let session = session(&root);
        let mut launcher = RecordingLauncher::default();
        let outcome = session.run(&request(&["dhr"]), &mut replies("q\n"), &mut launcher);
        assert!(matches!(outcome, FlowOutcome::Cancelled));
        assert!(launcher.opened.is_empty());
    }

    #[test]
    fn explicit_pick_out_of_range_aborts() {
        let root = results();
        let session = session(&root);
        let mut launcher = RecordingLauncher::default();
        let mut req = request(&["dhr"]);
        req.pick = Some(9);
        let outcome = session.run(&req, &mut replies(""), &mut launcher);
        assert!(matches!(
            outcome,
            FlowOutcome::SelectionAborted(SelectionError::OutOfRange { index: 9, len: 4 })
        ));
        assert!(launcher.opened.is_empty());
    }

    #[test]
    fn browser_failure_still_yields_url() {
        let root = results();
        let session = session(&root);
        let mut launcher = RecordingLauncher::failing();
        let outcome = session.run(&request(&["ycsbt"]), &mut replies(""), &mut launcher);
        match outcome {
            FlowOutcome::PrintedFallback { url, .. } => {
                assert!(url.as_str().starts_with("http://localhost:3001/d/beckc0nxpeupsf/"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn repeat_is_offered_only_after_a_choice_among_several() {
        let root = results();
        let session = session(&root);
        let pair = request(&["dhr", "10000tps"]);

        let single = session.run(
            &request(&["ycsbt"]),
            &mut replies(""),
            &mut RecordingLauncher::default(),
        );
        assert!(!single.can_repeat());

        let chosen = session.run(&pair, &mut replies("1\n"), &mut RecordingLauncher::default());
        assert!(matches!(chosen, FlowOutcome::Launched { matched: 2, .. }));
        assert!(chosen.can_repeat());

        let fallback = session.run(&pair, &mut replies("1\n"), &mut RecordingLauncher::failing());
        assert!(matches!(fallback, FlowOutcome::PrintedFallback { matched: 2, .. }));
        assert!(fallback.can_repeat());

        let cancelled = session.run(&pair, &mut replies("q\n"), &mut RecordingLauncher::default());
        assert!(matches!(cancelled, FlowOutcome::Cancelled));
        assert!(!cancelled.can_repeat());
    }

    #[test]
    fn margin_override_and_legacy_dashboard() {
        let root = results();
        let mut settings = Settings::default();
        settings.dashboard.legacy = Some(DashboardIdentity {
            uid: "legacyuid".into(),
            slug: "styx-legacy".into(),
        });
        let session = Session::open(settings, Some(root.path().to_path_buf())).unwrap();
        let mut launcher = RecordingLauncher::default();
        let mut req = request(&["2part"]);
        req.margin_secs = Some(0.0);
        let outcome = session.run(&req, &mut replies(""), &mut launcher);
        match outcome {
            FlowOutcome::Launched { url, window, .. } => {
                assert!(url.path().starts_with("/d/legacyuid/"));
                let record = &session.records()[0];
                assert!(record.is_legacy);
                assert_eq!(window.open_end, record.end);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn malformed_run_is_reported_not_fatal() {
        let root = results();
        let broken = root.path().join("broken_run");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("metadata.json"), "[]").unwrap();
        let session = session(&root);
        assert_eq!(session.records().len(), 5);
        assert_eq!(session.skipped().len(), 1);
        assert!(session.matches::<&str>(&[]).iter().all(|r| r.dir_name() != "broken_run"));
    }

    #[test]
    fn unreadable_root_is_fatal() {
        let temp = tempdir().unwrap();
        let result = Session::open(Settings::default(), Some(temp.path().join("missing")));
        assert!(result.is_err());
    }
}
