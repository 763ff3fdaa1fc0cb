use std::path::PathBuf;

use tracing::{info, info_span};

use crate::command::CommandSpec;
use crate::config::ScriptSettings;
use crate::error::ClusterError;

/// Parameters of one workload run, in the order the run script expects them.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadRun {
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
}

impl WorkloadRun {
    pub fn positional_args(&self) -> Vec<String> {
        vec![
            self.workload.clone(),
            self.input_rate.to_string(),
            self.n_keys.to_string(),
            self.n_partitions.to_string(),
            self.zipf_const.to_string(),
            self.client_threads.to_string(),
            self.total_time.to_string(),
            self.saving_dir.display().to_string(),
            self.warmup_seconds.to_string(),
            self.epoch_size.to_string(),
        ]
    }
}

/// Wrapper around the external run and teardown scripts.
///
/// The scripts own the cluster; this only launches them and treats a
/// non-zero exit as a hard failure. Teardown stops the compute side only and
/// leaves monitoring up.
#[derive(Debug, Clone)]
pub struct ClusterScripts {
    run: Option<PathBuf>,
    stop: Option<PathBuf>,
}

impl ClusterScripts {
    pub fn from_settings(settings: &ScriptSettings) -> Self {
        Self {
            run: settings.run.clone(),
            stop: settings.stop.clone(),
        }
    }

    pub fn run_command(&self, run: &WorkloadRun) -> Result<CommandSpec, ClusterError> {
        let script = self.run.as_ref().ok_or(ClusterError::NotConfigured("run"))?;
        Ok(CommandSpec::new(script.clone(), run.positional_args()))
    }

    pub fn stop_command(&self) -> Result<CommandSpec, ClusterError> {
        let script = self
            .stop
            .as_ref()
            .ok_or(ClusterError::NotConfigured("stop"))?;
        Ok(CommandSpec::new(script.clone(), Vec::new()))
    }

    pub fn run_workload(&self, run: &WorkloadRun) -> Result<(), ClusterError> {
        let span = info_span!("cluster.run", workload = %run.workload, rate = run.input_rate);
        let _guard = span.enter();
        execute(&self.run_command(run)?)
    }

    pub fn stop_cluster(&self) -> Result<(), ClusterError> {
        let span = info_span!("cluster.stop");
        let _guard = span.enter();
        execute(&self.stop_command()?)
    }
}

fn execute(command: &CommandSpec) -> Result<(), ClusterError> {
    let program = command.program_label();
    info!(command = %command.describe(), "running cluster script");
    let status = command.run().map_err(|source| ClusterError::Spawn {
        program: program.clone(),
        source,
    })?;
    if !status.success() {
        return Err(ClusterError::NonZeroExit {
            program,
            code: status.code(),
        });
    }
    Ok(())
}
