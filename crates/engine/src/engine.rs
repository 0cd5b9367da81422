use crate::classify::{Classification, RiskClassifier, VisibilityPolicy};
use crate::command::{
    generate_command_id, CommandLocation, CommandRecord, CommandStatus, ExecuteOptions,
    ExecutionResult,
};
use crate::config::{EngineConfig, LimitsConfig};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::registry::CommandRegistry;
use crate::supervisor::ProcessSupervisor;
use crate::surface::InteractiveSurface;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

/// Event bus depth per engine. Subscribers further behind than this drop
/// their oldest events instead of slowing the supervisor down.
const EVENT_CAPACITY: usize = 512;

/// Facade over the whole engine: classifies and registers commands, routes
/// them to the process supervisor or an interactive surface, and exposes
/// queries plus one broadcast event bus. Cheap to clone; all clones share
/// state.
///
/// Construction and submission errors (bad classifier config, empty
/// command, duplicate id) surface as `Err`. Everything that happens after
/// acceptance, including spawn failures, is reported through command state
/// and events instead.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine").finish_non_exhaustive()
    }
}

struct EngineInner {
    registry: Arc<RwLock<CommandRegistry>>,
    supervisor: ProcessSupervisor,
    events: broadcast::Sender<EngineEvent>,
    risk: RiskClassifier,
    visibility: VisibilityPolicy,
    limits: LimitsConfig,
    workspace_root: PathBuf,
    surface: Option<Arc<dyn InteractiveSurface>>,
}

impl ExecutionEngine {
    /// Engine without an interactive surface; interactive submissions fail
    /// until one is attached via [`ExecutionEngine::with_surface`].
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::build(config, None)
    }

    pub fn with_surface(
        config: EngineConfig,
        surface: Arc<dyn InteractiveSurface>,
    ) -> Result<Self, EngineError> {
        Self::build(config, Some(surface))
    }

    fn build(
        config: EngineConfig,
        surface: Option<Arc<dyn InteractiveSurface>>,
    ) -> Result<Self, EngineError> {
        let risk = RiskClassifier::from_config(&config.risk)?;
        let visibility = VisibilityPolicy::from_config(&config.visibility)?;
        let workspace_root = match config.workspace_root {
            Some(root) => root,
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let registry = Arc::new(RwLock::new(CommandRegistry::default()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let supervisor =
            ProcessSupervisor::new(registry.clone(), events.clone(), config.limits.clone());
        Ok(Self {
            inner: Arc::new(EngineInner {
                registry,
                supervisor,
                events,
                risk,
                visibility,
                limits: config.limits,
                workspace_root,
                surface,
            }),
        })
    }

    /// Submits a command. The returned result says whether it started, not
    /// how it ended; follow the events or poll [`ExecutionEngine::get_command`]
    /// for the outcome. `Err` is reserved for submissions the engine will
    /// not track at all.
    pub async fn execute_command(
        &self,
        command_line: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, EngineError> {
        let trimmed = command_line.trim();
        if trimmed.is_empty() {
            return Err(EngineError::EmptyCommandLine);
        }
        let id = options
            .command_id
            .clone()
            .unwrap_or_else(generate_command_id);
        let working_dir = options
            .working_dir
            .clone()
            .unwrap_or_else(|| self.inner.workspace_root.clone());
        let risk = self.inner.risk.classify(trimmed);
        let hidden = self.inner.visibility.is_hidden(trimmed);

        let record = CommandRecord::new(
            id.clone(),
            trimmed,
            working_dir.clone(),
            options.location,
            risk,
            hidden,
        );
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record)?;
        tracing::info!(
            event = "command.submitted",
            id = %id,
            location = ?options.location,
            risk = ?risk,
            hidden,
            command = %trimmed
        );

        match options.location {
            CommandLocation::Background => {
                let launched = self
                    .inner
                    .supervisor
                    .launch(&id, trimmed, &working_dir, options.env.as_ref())
                    .await;
                match launched {
                    Ok(_) => Ok(ExecutionResult::accepted(id, CommandStatus::Running)),
                    Err(failure) => Ok(ExecutionResult::failed(id, failure.to_string())),
                }
            }
            CommandLocation::Interactive => Ok(self.hand_off(&id, trimmed, &working_dir).await),
        }
    }

    /// Interactive commands run in the surface's terminal: no process
    /// handle, no output capture. Completion is synthesized after the
    /// settle delay since the surface owns the real lifetime.
    async fn hand_off(&self, id: &str, command_line: &str, working_dir: &Path) -> ExecutionResult {
        let Some(surface) = self.inner.surface.clone() else {
            tracing::warn!(event = "command.no_surface", id = %id);
            self.inner
                .supervisor
                .finalize(id, CommandStatus::Failed, 1, 0);
            return ExecutionResult::failed(id, "no interactive surface attached");
        };
        if let Err(err) = surface.display_and_run(command_line, working_dir).await {
            tracing::warn!(event = "command.surface_rejected", id = %id, error = %err);
            self.inner
                .supervisor
                .finalize(id, CommandStatus::Failed, 1, 0);
            return ExecutionResult::failed(id, err.to_string());
        }

        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .mark_running(id, None);
        let _ = self.inner.events.send(EngineEvent::Status {
            command_id: id.to_string(),
            status: CommandStatus::Running,
            process_id: None,
        });
        tracing::info!(event = "command.handed_off", id = %id, command = %command_line);

        let supervisor = self.inner.supervisor.clone();
        let command_id = id.to_string();
        let settle = Duration::from_millis(self.inner.limits.interactive_settle_ms);
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            supervisor.finalize(
                &command_id,
                CommandStatus::Completed,
                0,
                settle.as_millis() as u64,
            );
        });
        ExecutionResult::accepted(id, CommandStatus::Running)
    }

    /// Risk tier and visibility a command line would get, without running it.
    pub fn classify(&self, command_line: &str) -> Classification {
        let trimmed = command_line.trim();
        Classification {
            risk_level: self.inner.risk.classify(trimmed),
            hidden: self.inner.visibility.is_hidden(trimmed),
        }
    }

    /// True when the command had a live process and a graceful stop began.
    /// Never waits for the process to die.
    pub fn stop_command(&self, id: &str) -> bool {
        self.inner.supervisor.stop(id)
    }

    pub fn get_command(&self, id: &str) -> Option<CommandRecord> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
    }

    pub fn running_commands(&self) -> Vec<CommandRecord> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .running()
    }

    pub fn all_commands(&self) -> Vec<CommandRecord> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all()
    }

    /// Drops finished commands from the registry; live ones stay tracked.
    pub fn clear_completed(&self) -> usize {
        let cleared = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_completed();
        tracing::debug!(event = "registry.cleared_completed", cleared);
        cleared
    }

    /// New subscription to the event bus. Events published before the call
    /// are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Tears the engine down: every live command gets the stop ladder and
    /// the registry empties. Safe to call more than once.
    pub fn dispose(&self) {
        let stopped = self.inner.supervisor.stop_all();
        let cleared = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_all();
        tracing::info!(event = "engine.disposed", stopped, cleared);
    }
}
