use std::io::{self, BufRead, Write};

use chrono::Local;
use dialoguer::{Input, theme::ColorfulTheme};
use tracing::{debug, info};

use crate::error::SelectionError;
use crate::record::ExperimentRecord;

const CANCEL_WORDS: &[&str] = &["q", "quit", "exit"];

/// Source of operator replies during disambiguation.
pub trait SelectionInput {
    /// Show `prompt` and read one reply. `None` means end of input.
    fn read_choice(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Show a message between prompts.
    fn notify(&mut self, message: &str) -> io::Result<()>;
}

/// Interactive prompt on the controlling terminal.
pub struct TerminalInput {
    theme: ColorfulTheme,
}

impl TerminalInput {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionInput for TerminalInput {
    fn read_choice(&mut self, prompt: &str) -> io::Result<Option<String>> {
        match Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
        {
            Ok(value) => Ok(Some(value)),
            Err(dialoguer::Error::IO(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(dialoguer::Error::IO(err)) => Err(err),
        }
    }

    fn notify(&mut self, message: &str) -> io::Result<()> {
        writeln!(io::stderr(), "{message}")
    }
}

/// Line-oriented input for piped stdin and tests.
pub struct LineInput<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LineInput<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<R: BufRead, W: Write> SelectionInput for LineInput<R, W> {
    fn read_choice(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.writer, "{prompt}: ")?;
        self.writer.flush()?;
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn notify(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.writer, "{message}")
    }
}

/// Result of disambiguating a filtered subset.
#[derive(Debug, PartialEq)]
pub enum Choice<'a> {
    Selected(&'a ExperimentRecord),
    NoMatch,
    Cancelled,
}

/// Narrows a filtered subset down to a single run.
#[derive(Debug, Clone)]
pub struct Disambiguator {
    max_attempts: u32,
}

impl Disambiguator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Pick one record, prompting only when more than one matched.
    pub fn choose<'a>(
        &self,
        subset: &[&'a ExperimentRecord],
        input: &mut dyn SelectionInput,
    ) -> Result<Choice<'a>, SelectionError> {
        match subset {
            [] => Ok(Choice::NoMatch),
            [only] => {
                debug!(run = %only.dir_name(), "single match selected");
                Ok(Choice::Selected(*only))
            }
            _ => self.prompt(subset, input),
        }
    }

    /// Pick by a 1-based index given up front.
    pub fn pick<'a>(
        &self,
        subset: &[&'a ExperimentRecord],
        index: usize,
    ) -> Result<Choice<'a>, SelectionError> {
        if subset.is_empty() {
            return Ok(Choice::NoMatch);
        }
        index
            .checked_sub(1)
            .and_then(|zero_based| subset.get(zero_based))
            .map(|record| Choice::Selected(*record))
            .ok_or(SelectionError::OutOfRange {
                index,
                len: subset.len(),
            })
    }

    fn prompt<'a>(
        &self,
        subset: &[&'a ExperimentRecord],
        input: &mut dyn SelectionInput,
    ) -> Result<Choice<'a>, SelectionError> {
        let input_failed = |err: io::Error| SelectionError::Input(err.to_string());
        input.notify("Matching runs:").map_err(input_failed)?;
        for (index, record) in subset.iter().enumerate() {
            input
                .notify(&format!("  {}", format_record_line(index + 1, record)))
                .map_err(input_failed)?;
        }

        for attempt in 1..=self.max_attempts {
            let reply = input
                .read_choice("Select run number to open (empty or 'q' to cancel)")
                .map_err(input_failed)?;
            let Some(reply) = reply else {
                return Ok(Choice::Cancelled);
            };
            let reply = reply.trim();
            if reply.is_empty()
                || CANCEL_WORDS
                    .iter()
                    .any(|word| reply.eq_ignore_ascii_case(word))
            {
                return Ok(Choice::Cancelled);
            }

            let complaint = match reply.parse::<usize>() {
                Ok(index) if (1..=subset.len()).contains(&index) => {
                    let record = subset[index - 1];
                    info!(index, run = %record.dir_name(), "run selected");
                    return Ok(Choice::Selected(record));
                }
                Ok(_) => format!("Please enter a number between 1 and {}.", subset.len()),
                Err(_) => "Please enter a valid number or 'q'.".to_string(),
            };
            input.notify(&complaint).map_err(input_failed)?;
            debug!(attempt, reply, "rejected selection");
        }

        Err(SelectionError::TooManyAttempts(self.max_attempts))
    }
}

/// One listing line: index, run name, parameters and local time span.
pub fn format_record_line(index: usize, record: &ExperimentRecord) -> String {
    let mut details = vec![
        format!("workload={}", record.workload),
        format!("tps={}", record.messages_per_second),
        format!("partitions={}", record.n_partitions),
        format!("keys={}", record.n_keys),
    ];
    if let Some(duration) = record.declared_duration_seconds {
        details.push(format!("duration={duration:.0}s"));
    }
    if let Some(threads) = record.n_threads {
        details.push(format!("threads={threads}"));
    }
    if let Some(interval) = record.increase_interval {
        details.push(format!("increase_interval={interval}s"));
    }
    if let Some(amount) = record.increase_amount {
        details.push(format!("increase_amount={amount}"));
    }
    if record.zipf_const != 0.0 {
        details.push(format!("zipf={}", record.zipf_const));
    }
    if let Some(epoch) = record.epoch_size {
        details.push(format!("epoch_size={epoch}"));
    }
    if record.is_legacy {
        details.push("legacy".into());
    }

    let start = record.start.with_timezone(&Local);
    let end = record.end.with_timezone(&Local);
    format!(
        "[{index:>2}] {}  ({})  {} -> {}",
        record.dir_name(),
        details.join(", "),
        start.format("%Y-%m-%d %H:%M:%S"),
        end.format("%H:%M:%S")
    )
}
