use std::{path::PathBuf, process};

use anyhow::Result;
use clap::Parser;
use dialoguer::{Confirm, Input, theme::ColorfulTheme};
use runscope::{
    Session,
    config::{DashboardIdentity, DashboardSettings, Settings, TraceFileSettings},
};

#[derive(Parser, Debug)]
#[command(
    name = "runscope-settings",
    about = "Interactive runscope settings editor",
    version
)]
struct SettingsCli {
    /// Optional configuration file override.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print current settings in JSON and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    print: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("runscope-settings: {err:?}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = SettingsCli::parse();
    let (mut settings, config_path) = Session::bootstrap_settings(args.config.clone())?;

    if args.print {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let theme = ColorfulTheme::default();

    edit_results_dir(&theme, &mut settings);
    edit_dashboard(&theme, &mut settings.dashboard);
    edit_margin(&theme, &mut settings);
    edit_trace_file(&theme, &mut settings.logging.trace_file);

    println!("\nReview:");
    println!("  results_dir        : {}", settings.results_dir.display());
    println!("  dashboard.base_url : {}", settings.dashboard.base_url);
    println!(
        "  dashboard          : {}/{}",
        settings.dashboard.uid, settings.dashboard.slug
    );
    let legacy = settings
        .dashboard
        .legacy
        .as_ref()
        .map(|identity| format!("{}/{}", identity.uid, identity.slug))
        .unwrap_or_else(|| "(same as primary)".into());
    println!("  dashboard.legacy   : {legacy}");
    println!(
        "  correction margin  : {}s",
        settings.window.correction_margin_secs
    );
    println!(
        "  trace file         : {}",
        if settings.logging.trace_file.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    if !Confirm::with_theme(&theme)
        .with_prompt("Save changes?")
        .default(true)
        .interact()?
    {
        println!("Changes discarded.");
        return Ok(());
    }

    settings.validate()?;
    settings.save(&config_path)?;

    println!("Settings saved to {}", config_path.display());

    Ok(())
}

fn prompt_text(theme: &ColorfulTheme, prompt: &str, current: &str) -> Option<String> {
    Input::<String>::with_theme(theme)
        .with_prompt(prompt)
        .allow_empty(true)
        .with_initial_text(current)
        .interact_text()
        .ok()
        .map(|value| value.trim().to_string())
}

fn edit_results_dir(theme: &ColorfulTheme, settings: &mut Settings) {
    let current = settings.results_dir.display().to_string();
    if let Some(value) = prompt_text(theme, "Results directory", &current) {
        if !value.is_empty() {
            settings.results_dir = PathBuf::from(value);
        }
    }
}

fn edit_dashboard(theme: &ColorfulTheme, dashboard: &mut DashboardSettings) {
    if let Some(value) = prompt_text(theme, "Grafana base URL", &dashboard.base_url) {
        if !value.is_empty() {
            dashboard.base_url = value;
        }
    }
    if let Some(value) = prompt_text(theme, "Dashboard UID", &dashboard.uid) {
        if !value.is_empty() {
            dashboard.uid = value;
        }
    }
    if let Some(value) = prompt_text(theme, "Dashboard slug", &dashboard.slug) {
        dashboard.slug = value;
    }

    let current_legacy = dashboard
        .legacy
        .as_ref()
        .map(|identity| identity.uid.clone())
        .unwrap_or_default();
    if let Some(value) = prompt_text(
        theme,
        "Legacy dashboard UID (leave blank to reuse the primary)",
        &current_legacy,
    ) {
        if value.is_empty() {
            dashboard.legacy = None;
        } else {
            let slug = dashboard
                .legacy
                .as_ref()
                .map(|identity| identity.slug.clone())
                .unwrap_or_default();
            let slug = prompt_text(theme, "Legacy dashboard slug", &slug).unwrap_or(slug);
            dashboard.legacy = Some(DashboardIdentity { uid: value, slug });
        }
    }
}

fn edit_margin(theme: &ColorfulTheme, settings: &mut Settings) {
    if let Ok(value) = Input::<f64>::with_theme(theme)
        .with_prompt("Seconds added after the recorded end")
        .default(settings.window.correction_margin_secs)
        .validate_with(|value: &f64| {
            if value.is_finite() && *value >= 0.0 {
                Ok(())
            } else {
                Err("must be a non-negative number")
            }
        })
        .interact_text()
    {
        settings.window.correction_margin_secs = value;
    }
}

fn edit_trace_file(theme: &ColorfulTheme, traces: &mut TraceFileSettings) {
    if let Ok(enabled) = Confirm::with_theme(theme)
        .with_prompt("Write JSON trace files?")
        .default(traces.enabled)
        .interact()
    {
        traces.enabled = enabled;
    }

    if traces.enabled {
        let current_dir = traces
            .directory
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        if let Some(value) = prompt_text(
            theme,
            "Trace output directory (leave blank for default)",
            &current_dir,
        ) {
            traces.directory = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }

        if let Ok(value) = Input::<usize>::with_theme(theme)
            .with_prompt("Maximum trace files to retain (0 = unlimited)")
            .default(traces.max_files)
            .interact_text()
        {
            traces.max_files = value;
        }
    }
}
