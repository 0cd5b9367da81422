//! Command execution engine: launches OS commands, tracks their lifecycle
//! from submission to a terminal state, streams their output, and stops them
//! gracefully on request or forcefully when they outrun the fail-safe limit.
//!
//! [`ExecutionEngine`] is the entry point. Commands run either in the
//! background under the engine's own process supervision or are handed to an
//! [`InteractiveSurface`]. Observers follow along through the broadcast
//! event bus from [`ExecutionEngine::subscribe`].

mod classify;
mod command;
mod config;
mod engine;
mod error;
mod events;
mod output;
mod registry;
mod supervisor;
mod surface;

pub use classify::Classification;
pub use command::{
    CommandLocation, CommandRecord, CommandStatus, ExecuteOptions, ExecutionResult, OutputLine,
    OutputStream, RiskLevel,
};
pub use config::{EngineConfig, LimitsConfig, RiskConfig, VisibilityConfig};
pub use engine::ExecutionEngine;
pub use error::EngineError;
pub use events::EngineEvent;
pub use surface::InteractiveSurface;
