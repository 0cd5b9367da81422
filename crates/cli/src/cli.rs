use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "overseer", version, about = "Run and supervise OS commands")]
pub(crate) struct Args {
    /// Engine configuration file; built-in defaults apply when omitted.
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    /// Write daily-rolling JSON logs into this directory.
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Run a command under supervision and stream its output.
    Run {
        /// The command line to execute. Everything from the first token on
        /// is passed through verbatim, its flags included.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Working directory for the command.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Extra child environment, repeatable.
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Hand off to an interactive surface instead of supervising.
        #[arg(long, default_value_t = false)]
        interactive: bool,
        /// Emit line-delimited JSON events instead of plain output.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Report risk tier and visibility for a command line without running it.
    Classify {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Emit the classification as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
