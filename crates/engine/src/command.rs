use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandLocation {
    /// Supervised directly: process handle owned, output captured.
    Background,
    /// Handed to an external terminal surface: output not captured,
    /// completion synthesized.
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Dangerous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub content: String,
    pub stream: OutputStream,
    pub at_ms: u64,
}

/// One tracked command, from submission to terminal state. Owned by the
/// registry; reads hand out clones, never references into the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: String,
    pub command_line: String,
    pub working_dir: PathBuf,
    pub location: CommandLocation,
    pub status: CommandStatus,
    pub risk_level: RiskLevel,
    pub hidden: bool,
    #[serde(default)]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub started_at_ms: u64,
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
    #[serde(default)]
    pub output: Vec<OutputLine>,
    #[serde(default)]
    pub output_truncated: bool,
}

impl CommandRecord {
    pub(crate) fn new(
        id: String,
        command_line: &str,
        working_dir: PathBuf,
        location: CommandLocation,
        risk_level: RiskLevel,
        hidden: bool,
    ) -> Self {
        Self {
            id,
            command_line: command_line.to_string(),
            working_dir,
            location,
            status: CommandStatus::Pending,
            risk_level,
            hidden,
            process_id: None,
            exit_code: None,
            started_at_ms: now_ms(),
            finished_at_ms: None,
            output: Vec::new(),
            output_truncated: false,
        }
    }
}

/// Submission parameters for [`crate::ExecutionEngine::execute_command`].
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub working_dir: Option<PathBuf>,
    pub env: Option<BTreeMap<String, String>>,
    pub location: CommandLocation,
    pub command_id: Option<String>,
}

impl ExecuteOptions {
    pub fn background() -> Self {
        Self {
            working_dir: None,
            env: None,
            location: CommandLocation::Background,
            command_id: None,
        }
    }

    pub fn interactive() -> Self {
        Self {
            location: CommandLocation::Interactive,
            ..Self::background()
        }
    }
}

/// Outcome of a submission. `success: false` means the command was accepted
/// but could not be started; it is already finalized as Failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub command_id: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub(crate) fn accepted(command_id: impl Into<String>, status: CommandStatus) -> Self {
        Self {
            success: true,
            command_id: command_id.into(),
            status,
            error: None,
        }
    }

    pub(crate) fn failed(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            command_id: command_id.into(),
            status: CommandStatus::Failed,
            error: Some(message.into()),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}

/// Opaque, log-safe command id: `cmd_<unix-millis>_<random>`.
pub(crate) fn generate_command_id() -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("cmd_{}_{}", now_ms(), &entropy[..8])
}
