use std::{
    path::PathBuf,
    process::{Command, ExitStatus},
};

/// Materialised command specification ready to be spawned or logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn program_label(&self) -> String {
        self.program.display().to_string()
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    /// Run to completion, inheriting stdio.
    pub fn run(&self) -> std::io::Result<ExitStatus> {
        self.to_command().status()
    }

    pub fn describe(&self) -> String {
        if self.args.is_empty() {
            return self.program.display().to_string();
        }
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_joins_program_and_args() {
        let spec = CommandSpec::new("/usr/bin/xdg-open", vec!["http://localhost:3001".into()]);
        assert_eq!(spec.describe(), "/usr/bin/xdg-open http://localhost:3001");
        assert_eq!(CommandSpec::new("stop.sh", vec![]).describe(), "stop.sh");
    }

    #[test]
    fn to_command_carries_args() {
        let spec = CommandSpec::new("run.sh", vec!["dhr".into(), "1000".into()]);
        let command = spec.to_command();
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["dhr", "1000"]);
        assert_eq!(spec.args().len(), 2);
    }
}
