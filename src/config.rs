use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

/// Operator configuration for runscope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding one subdirectory per recorded run.
    #[serde(default = "Settings::default_results_dir")]
    pub results_dir: PathBuf,
    /// Directory-name prefix marking runs captured before the extended metric set.
    #[serde(default = "Settings::default_legacy_prefix")]
    pub legacy_prefix: String,
    /// Allowed drift between the declared duration and `end - start`.
    #[serde(default = "Settings::default_duration_tolerance")]
    pub duration_tolerance_secs: f64,
    #[serde(default)]
    pub dashboard: DashboardSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub selection: SelectionSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub scripts: ScriptSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    fn default_results_dir() -> PathBuf {
        PathBuf::from("results")
    }

    fn default_legacy_prefix() -> String {
        "legacy_".into()
    }

    const fn default_duration_tolerance() -> f64 {
        5.0
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            results_dir: Self::default_results_dir(),
            legacy_prefix: Self::default_legacy_prefix(),
            duration_tolerance_secs: Self::default_duration_tolerance(),
            dashboard: DashboardSettings::default(),
            window: WindowSettings::default(),
            selection: SelectionSettings::default(),
            browser: BrowserSettings::default(),
            scripts: ScriptSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, writing defaults if missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config at {}", path.display()))?;
            let parsed: Self = if is_toml(path) {
                toml::from_str(&raw)
                    .with_context(|| format!("Malformed config at {}", path.display()))?
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Malformed config at {}", path.display()))?
            };
            parsed
                .validate()
                .with_context(|| format!("Invalid config at {}", path.display()))?;
            Ok(parsed)
        } else {
            let settings = Self::default();
            settings.save(path).with_context(|| {
                format!("Failed to write default config to {}", path.display())
            })?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }
        let serialised = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        fs::write(path, serialised)
            .with_context(|| format!("Failed to persist config to {}", path.display()))
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.dashboard.base_url()?;
        if self.dashboard.uid.trim().is_empty() {
            bail!("dashboard.uid must not be empty");
        }
        if let Some(legacy) = &self.dashboard.legacy {
            if legacy.uid.trim().is_empty() {
                bail!("dashboard.legacy.uid must not be empty");
            }
        }
        let margin = self.window.correction_margin_secs;
        if !margin.is_finite() || margin < 0.0 {
            bail!("window.correction_margin_secs must be a non-negative number (got {margin})");
        }
        if self.selection.max_attempts == 0 {
            bail!("selection.max_attempts must be at least 1");
        }
        if !self.duration_tolerance_secs.is_finite() || self.duration_tolerance_secs < 0.0 {
            bail!("duration_tolerance_secs must be a non-negative number");
        }
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// Identity of a single Grafana dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardIdentity {
    pub uid: String,
    #[serde(default)]
    pub slug: String,
}

/// Where and how to open the time-series dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSettings {
    #[serde(default = "DashboardSettings::default_base_url")]
    pub base_url: String,
    #[serde(default = "DashboardSettings::default_uid")]
    pub uid: String,
    #[serde(default = "DashboardSettings::default_slug")]
    pub slug: String,
    #[serde(default)]
    pub org_id: Option<u32>,
    /// Grafana `timezone` parameter (e.g. `browser`, `utc`).
    #[serde(default)]
    pub timezone: Option<String>,
    /// Extra dashboard template variables, emitted as `var-<name>=<value>`.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Dashboard used for legacy runs that lack the extended series.
    #[serde(default)]
    pub legacy: Option<DashboardIdentity>,
}

impl DashboardSettings {
    fn default_base_url() -> String {
        "http://localhost:3001".into()
    }

    fn default_uid() -> String {
        "beckc0nxpeupsf".into()
    }

    fn default_slug() -> String {
        "styx-system-overview".into()
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .with_context(|| format!("dashboard.base_url '{}' is not a valid URL", self.base_url))
    }

    pub fn primary(&self) -> DashboardIdentity {
        DashboardIdentity {
            uid: self.uid.clone(),
            slug: self.slug.clone(),
        }
    }

    /// Pick the dashboard for a run, preferring the legacy board for legacy runs.
    pub fn identity_for(&self, is_legacy: bool) -> DashboardIdentity {
        match (&self.legacy, is_legacy) {
            (Some(legacy), true) => legacy.clone(),
            _ => self.primary(),
        }
    }
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            uid: Self::default_uid(),
            slug: Self::default_slug(),
            org_id: None,
            timezone: None,
            variables: BTreeMap::new(),
            legacy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    /// Seconds appended to the recorded end so the drained tail stays visible.
    #[serde(default = "WindowSettings::default_margin")]
    pub correction_margin_secs: f64,
}

impl WindowSettings {
    const fn default_margin() -> f64 {
        15.0
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            correction_margin_secs: Self::default_margin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSettings {
    #[serde(default = "SelectionSettings::default_max_attempts")]
    pub max_attempts: u32,
}

impl SelectionSettings {
    const fn default_max_attempts() -> u32 {
        3
    }
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Program used to open URLs instead of the platform opener.
    #[serde(default)]
    pub command: Option<PathBuf>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Paths to the external cluster lifecycle scripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptSettings {
    #[serde(default)]
    pub run: Option<PathBuf>,
    #[serde(default)]
    pub stop: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub trace_file: TraceFileSettings,
}

/// Controls the JSON trace file written next to the console log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFileSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "TraceFileSettings::default_max_files")]
    pub max_files: usize,
}

impl TraceFileSettings {
    const fn default_max_files() -> usize {
        10
    }
}

impl Default for TraceFileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: None,
            max_files: Self::default_max_files(),
        }
    }
}

pub(crate) fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("io", "styx", "Runscope").context("Unable to resolve platform directories")
}

/// Compute the default path to the configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.json"))
}

/// Per-invocation knobs supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub tokens: Vec<String>,
    /// 1-based index chosen up front instead of prompting.
    pub pick: Option<usize>,
    /// Overrides `window.correction_margin_secs` for this invocation.
    pub margin_secs: Option<f64>,
    pub keep_open: bool,
}
