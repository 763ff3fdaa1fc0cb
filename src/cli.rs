use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{debug, info};

use crate::{
    FlowOutcome, Session,
    cluster::{ClusterScripts, WorkloadRun},
    config::LaunchRequest,
    dashboard::{DryRunLauncher, Launcher, SystemLauncher},
    logging::{current_trace_file, init_tracing},
    select::{LineInput, SelectionInput, TerminalInput, format_record_line},
};

#[derive(Parser, Debug)]
#[command(
    name = "runscope",
    version,
    about = "Find recorded experiment runs and open their dashboards",
    long_about = None
)]
pub struct Cli {
    /// Increase logging verbosity.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Custom config path.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Results directory (overrides `results_dir` from the config).
    #[arg(long, global = true, value_name = "DIR")]
    pub results: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pick a run by filter tokens and open its dashboard window.
    Launch(LaunchArgs),
    /// Print the runs matching the filter tokens without opening anything.
    List(ListArgs),
    /// Start a workload run through the configured run script.
    Run(RunArgs),
    /// Stop the cluster's compute components (monitoring stays up).
    Stop(StopArgs),
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Filter tokens: a workload name, `<N>tps`, `<N>part` or `<N>keys`.
    #[arg(value_name = "TOKEN")]
    pub tokens: Vec<String>,

    /// Choose the N-th match (1-based) instead of prompting.
    #[arg(long, value_name = "N")]
    pub pick: Option<usize>,

    /// Seconds added to the recorded end (overrides window.correction_margin_secs).
    #[arg(long, value_name = "SECONDS")]
    pub margin: Option<f64>,

    /// Print the dashboard URL instead of opening a browser.
    #[arg(long, action = ArgAction::SetTrue)]
    pub print_url: bool,

    /// Offer the list again after each launch until cancelled.
    #[arg(long, action = ArgAction::SetTrue)]
    pub keep_open: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(value_name = "TOKEN")]
    pub tokens: Vec<String>,

    /// Seconds added to the recorded end when showing dashboard URLs.
    #[arg(long, value_name = "SECONDS")]
    pub margin: Option<f64>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    pub workload: String,
    pub input_rate: u64,
    pub n_keys: u64,
    pub n_partitions: u64,
    pub zipf_const: f64,
    pub client_threads: u32,
    pub total_time: u64,
    pub saving_dir: PathBuf,
    pub warmup_seconds: u64,
    pub epoch_size: u64,

    /// Print the script invocation without running it.
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Print the script invocation without running it.
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,
}

impl From<&RunArgs> for WorkloadRun {
    fn from(args: &RunArgs) -> Self {
        WorkloadRun {
            workload: args.workload.clone(),
            input_rate: args.input_rate,
            n_keys: args.n_keys,
            n_partitions: args.n_partitions,
            zipf_const: args.zipf_const,
            client_threads: args.client_threads,
            total_time: args.total_time,
            saving_dir: args.saving_dir.clone(),
            warmup_seconds: args.warmup_seconds,
            epoch_size: args.epoch_size,
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let (settings, config_path) = Session::bootstrap_settings(cli.config.clone())?;
    init_tracing(cli.verbose, &settings.logging.trace_file)?;
    debug!(path = %config_path.display(), "using config");
    if let Some(path) = current_trace_file() {
        debug!(path = %path.display(), "writing trace file");
    }

    match &cli.command {
        Command::Launch(args) => {
            let session = Session::open(settings, cli.results.clone())?;
            launch(&session, args);
            Ok(())
        }
        Command::List(args) => {
            let session = Session::open(settings, cli.results.clone())?;
            list(&session, args)
        }
        Command::Run(args) => {
            let scripts = ClusterScripts::from_settings(&settings.scripts);
            let run = WorkloadRun::from(args);
            if args.dry_run {
                println!("{}", scripts.run_command(&run)?.describe());
                return Ok(());
            }
            scripts
                .run_workload(&run)
                .with_context(|| format!("workload run '{}' failed", run.workload))?;
            info!(saving_dir = %run.saving_dir.display(), "workload run finished");
            Ok(())
        }
        Command::Stop(args) => {
            let scripts = ClusterScripts::from_settings(&settings.scripts);
            if args.dry_run {
                println!("{}", scripts.stop_command()?.describe());
                return Ok(());
            }
            scripts.stop_cluster().context("cluster teardown failed")?;
            info!("cluster compute stopped; monitoring left running");
            Ok(())
        }
    }
}

fn launch(session: &Session, args: &LaunchArgs) {
    let request = LaunchRequest {
        tokens: args.tokens.clone(),
        pick: args.pick,
        margin_secs: args.margin,
        keep_open: args.keep_open,
    };

    let mut input: Box<dyn SelectionInput> = if io::stdin().is_terminal() {
        Box::new(TerminalInput::new())
    } else {
        Box::new(LineInput::new(io::stdin().lock(), io::stdout()))
    };
    let mut launcher: Box<dyn Launcher> = if args.print_url {
        Box::new(DryRunLauncher)
    } else {
        Box::new(SystemLauncher::new(session.settings().browser.clone()))
    };

    loop {
        let outcome = session.run(&request, input.as_mut(), launcher.as_mut());
        report_outcome(&outcome, args.print_url);
        if !offer_again(&request, &outcome) {
            break;
        }
    }
}

/// `--keep-open` re-lists only when the operator still has something to choose.
fn offer_again(request: &LaunchRequest, outcome: &FlowOutcome) -> bool {
    request.keep_open && request.pick.is_none() && outcome.can_repeat()
}

fn report_outcome(outcome: &FlowOutcome, print_url: bool) {
    match outcome {
        FlowOutcome::Launched { run, url, .. } => {
            if print_url {
                println!("{url}");
            } else {
                println!("Opened dashboard for {run}:\n  {url}");
            }
        }
        FlowOutcome::PrintedFallback { run, url, error, .. } => {
            eprintln!("Could not open a browser for {run} ({error}). Open this URL manually:");
            println!("{url}");
        }
        FlowOutcome::NoMatches { tokens } => {
            if tokens.is_empty() {
                println!("No experiment runs found.");
            } else {
                let rendered: Vec<String> = tokens.iter().map(|token| token.to_string()).collect();
                println!("No matching experiment for: {}", rendered.join(" "));
            }
        }
        FlowOutcome::Cancelled => println!("Cancelled."),
        FlowOutcome::SelectionAborted(error) => eprintln!("Selection aborted: {error}"),
        FlowOutcome::ResolutionFailed { run, error } => {
            eprintln!("Cannot open {run}: {error}");
        }
    }
}

fn list(session: &Session, args: &ListArgs) -> Result<()> {
    let matches = session.matches(args.tokens.as_slice());
    if matches.is_empty() {
        println!("No matching experiment runs in {}.", session.results_dir().display());
        return Ok(());
    }

    let resolver = session.resolver(args.margin)?;
    for (index, record) in matches.iter().enumerate() {
        println!("{}", format_record_line(index + 1, record));
        match resolver.resolve(record) {
            Ok(window) => {
                let identity = session.settings().dashboard.identity_for(record.is_legacy);
                println!("     {}", session.dashboard().build_url(&window, &identity));
            }
            Err(error) => println!("     (no dashboard window: {error})"),
        }
    }
    Ok(())
}
