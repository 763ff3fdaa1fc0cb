use std::{
    env,
    path::PathBuf,
    process::Stdio,
};

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};
use url::Url;

use crate::command::CommandSpec;
use crate::config::{BrowserSettings, DashboardIdentity, DashboardSettings};
use crate::error::LaunchError;
use crate::window::ResolvedWindow;

/// Capability to open a URL somewhere the operator can see it.
pub trait Launcher {
    fn open(&mut self, url: &Url) -> Result<(), LaunchError>;
}

/// Opens URLs through the configured browser or the platform opener.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher {
    settings: BrowserSettings,
}

/// How a URL gets handed to the desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenerPlan {
    command: CommandSpec,
    /// Openers exit quickly and report failure through their status; a
    /// browser binary keeps running, so only the spawn is checked.
    wait_for_exit: bool,
}

impl SystemLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn plan(&self, url: &Url) -> Result<OpenerPlan, LaunchError> {
        if let Some(program) = &self.settings.command {
            let mut args = self.settings.extra_args.clone();
            args.push(url.to_string());
            return Ok(OpenerPlan {
                command: CommandSpec::new(program.clone(), args),
                wait_for_exit: false,
            });
        }

        if let Some(program) = browser_from_env() {
            return Ok(OpenerPlan {
                command: CommandSpec::new(program, vec![url.to_string()]),
                wait_for_exit: false,
            });
        }

        platform_opener(url).ok_or(LaunchError::NoOpener)
    }
}

fn browser_from_env() -> Option<PathBuf> {
    let value = env::var("BROWSER").ok()?;
    value
        .split(':')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| which::which(candidate).ok())
}

fn platform_opener(url: &Url) -> Option<OpenerPlan> {
    let target = url.to_string();
    let (program, args): (&str, Vec<String>) = if cfg!(target_os = "macos") {
        ("open", vec![target])
    } else if cfg!(target_os = "windows") {
        // `cmd /C start` would split the query string at `&`.
        (
            "rundll32",
            vec!["url.dll,FileProtocolHandler".into(), target],
        )
    } else {
        let candidates = ["xdg-open", "gio", "sensible-browser"];
        let found = candidates
            .iter()
            .find_map(|candidate| which::which(candidate).ok().map(|path| (*candidate, path)))?;
        let args = match found.0 {
            "gio" => vec!["open".into(), target],
            _ => vec![target],
        };
        return Some(OpenerPlan {
            command: CommandSpec::new(found.1, args),
            wait_for_exit: found.0 != "sensible-browser",
        });
    };
    let path = which::which(program).ok()?;
    Some(OpenerPlan {
        command: CommandSpec::new(path, args),
        wait_for_exit: true,
    })
}

impl Launcher for SystemLauncher {
    fn open(&mut self, url: &Url) -> Result<(), LaunchError> {
        let plan = self.plan(url)?;
        debug!(command = %plan.command.describe(), "opening dashboard");
        let program = plan.command.program_label();
        let mut child = plan
            .command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;
        if plan.wait_for_exit {
            let status = child.wait().map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;
            if !status.success() {
                return Err(LaunchError::Failed {
                    program,
                    code: status.code(),
                });
            }
        }
        Ok(())
    }
}

/// Collects URLs instead of opening them.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    pub opened: Vec<Url>,
    /// When set, every open fails with `LaunchError::NoOpener`.
    pub fail: bool,
}

impl RecordingLauncher {
    pub fn failing() -> Self {
        Self {
            opened: Vec::new(),
            fail: true,
        }
    }
}

impl Launcher for RecordingLauncher {
    fn open(&mut self, url: &Url) -> Result<(), LaunchError> {
        if self.fail {
            return Err(LaunchError::NoOpener);
        }
        self.opened.push(url.clone());
        Ok(())
    }
}

/// Accepts every URL without side effects; used for `--print-url`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunLauncher;

impl Launcher for DryRunLauncher {
    fn open(&mut self, url: &Url) -> Result<(), LaunchError> {
        debug!(%url, "dry run, not opening browser");
        Ok(())
    }
}

/// What happened when a dashboard was handed to the launcher.
#[derive(Debug)]
pub enum LaunchOutcome {
    Opened(Url),
    /// The browser could not be opened; the URL must be shown to the operator.
    Fallback { url: Url, error: LaunchError },
}

impl LaunchOutcome {
    pub fn url(&self) -> &Url {
        match self {
            LaunchOutcome::Opened(url) => url,
            LaunchOutcome::Fallback { url, .. } => url,
        }
    }
}

/// Builds Grafana URLs scoped to a resolved window.
#[derive(Debug, Clone)]
pub struct DashboardLauncher {
    base_url: Url,
    settings: DashboardSettings,
}

impl DashboardLauncher {
    pub fn new(settings: DashboardSettings) -> Result<Self> {
        let base_url = settings.base_url()?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!(
                "dashboard.base_url '{}' cannot carry a path",
                settings.base_url
            ));
        }
        Ok(Self { base_url, settings })
    }

    /// `{base}/d/{uid}/{slug}?from=<ms>&to=<ms>` plus the configured extras.
    pub fn build_url(&self, window: &ResolvedWindow, identity: &DashboardIdentity) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("d").push(&identity.uid);
            if !identity.slug.is_empty() {
                segments.push(&identity.slug);
            }
        }
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("from", &window.start_millis().to_string())
                .append_pair("to", &window.end_millis().to_string());
            if let Some(org_id) = self.settings.org_id {
                query.append_pair("orgId", &org_id.to_string());
            }
            if let Some(timezone) = &self.settings.timezone {
                query.append_pair("timezone", timezone);
            }
            for (name, value) in &self.settings.variables {
                query.append_pair(&format!("var-{name}"), value);
            }
        }
        url
    }

    /// Open the dashboard, degrading to a printable URL if the browser fails.
    pub fn launch(
        &self,
        window: &ResolvedWindow,
        identity: &DashboardIdentity,
        launcher: &mut dyn Launcher,
    ) -> LaunchOutcome {
        let url = self.build_url(window, identity);
        match launcher.open(&url) {
            Ok(()) => {
                info!(%url, dashboard = %identity.uid, "opened dashboard");
                LaunchOutcome::Opened(url)
            }
            Err(error) => {
                warn!(%url, error = %error, "failed to open browser");
                LaunchOutcome::Fallback { url, error }
            }
        }
    }
}
