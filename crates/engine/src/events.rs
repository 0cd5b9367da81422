use serde::Serialize;

use crate::command::{CommandStatus, OutputLine};

/// Everything observers can learn about a command after submission. One
/// broadcast bus carries all three notification kinds so any number of
/// subscribers can follow along; a slow subscriber lags and drops, it never
/// blocks the supervisor.
///
/// Per-command ordering: `Status` with `Running` precedes every `Output`;
/// `Completed` is the last event and fires exactly once.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Output {
        command_id: String,
        line: OutputLine,
    },
    Status {
        command_id: String,
        status: CommandStatus,
        process_id: Option<u32>,
    },
    Completed {
        command_id: String,
        status: CommandStatus,
        exit_code: i32,
        duration_ms: u64,
    },
}

impl EngineEvent {
    pub fn command_id(&self) -> &str {
        match self {
            Self::Output { command_id, .. }
            | Self::Status { command_id, .. }
            | Self::Completed { command_id, .. } => command_id,
        }
    }
}
