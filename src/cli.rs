use clap::Parser;
use std::path::PathBuf;

use crate::policy::OutputMode;

/// procrun - run a command and report how it finished
///
/// Runs a child process with per-stream output handling (forward, capture,
/// both, discard) and exits with the child's exit status.
#[derive(Parser, Debug)]
#[command(
    name = "procrun",
    version,
    about = "Run a command with captured, forwarded or discarded output",
    long_about = "Runs a command as a child process. Each output stream can be forwarded to the\n\
                  terminal, captured, captured and shown (both), or discarded. On failure the\n\
                  captured stderr is included in the report."
)]
pub struct Cli {
    /// How to handle the child's standard output
    #[arg(long = "stdout", value_enum, default_value_t = OutputMode::Both)]
    pub stdout: OutputMode,

    /// How to handle the child's standard error
    #[arg(long = "stderr", value_enum, default_value_t = OutputMode::Both)]
    pub stderr: OutputMode,

    /// Run the command in this directory
    #[arg(short = 'C', long = "cwd", value_name = "dir")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable for the child
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Replace procrun with the command instead of supervising it
    #[arg(long = "exec")]
    pub exec: bool,

    /// Be verbose about what you're doing
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Command and its arguments to execute
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Validate the parsed arguments
    pub fn validate(&self) -> Result<(), crate::error::RunnerError> {
        use crate::error::RunnerError;

        if self.command.is_empty() {
            return Err(RunnerError::InvalidArguments(
                "No command specified".to_string(),
            ));
        }

        if let Some(ref dir) = self.cwd {
            if !dir.is_dir() {
                return Err(RunnerError::InvalidArguments(format!(
                    "Working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        self.env_pairs().map(|_| ())
    }

    /// Split the `--env` values into key/value pairs
    pub fn env_pairs(&self) -> Result<Vec<(String, String)>, crate::error::RunnerError> {
        self.env
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(crate::error::RunnerError::InvalidArguments(format!(
                    "Expected KEY=VALUE, got '{}'",
                    entry
                ))),
            })
            .collect()
    }

    /// Tracing filter matching the verbosity level
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    /// The program name (first element of the command)
    pub fn program(&self) -> &str {
        &self.command[0]
    }

    /// Arguments after the program name
    pub fn arguments(&self) -> &[String] {
        &self.command[1..]
    }
}
