use std::io;
use thiserror::Error;

/// Rejections the facade raises outright. Everything else (missing
/// executables, bad working directories, timeouts, stops) becomes command
/// state plus events, never an `Err` from the public API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("command line is empty")]
    EmptyCommandLine,
    #[error("command id already registered: {0}")]
    DuplicateCommandId(String),
    #[error("invalid classifier pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Why a background command never got a process handle. Converted into a
/// Failed record (exit code 1) and the error string of the submission
/// result; not part of the public error surface.
#[derive(Debug, Error)]
pub(crate) enum SpawnFailure {
    #[error("invalid working directory {path}: {reason}")]
    WorkingDir { path: String, reason: String },
    #[error("unparsable command line: {0}")]
    Parse(shell_words::ParseError),
    #[error("executable not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("failed to spawn {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnFailure {
    pub(crate) fn from_io(program: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Io {
                program: program.to_string(),
                source,
            },
        }
    }
}
