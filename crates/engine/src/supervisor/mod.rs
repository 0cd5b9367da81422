mod process;
mod stream;

use crate::command::{now_ms, CommandStatus, OutputLine, OutputStream};
use crate::config::LimitsConfig;
use crate::error::SpawnFailure;
use crate::events::EngineEvent;
use crate::output::OutputSink;
use crate::registry::CommandRegistry;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to wait for the pipe pumps after the process is gone. Only
/// exceeded when an orphaned descendant keeps the pipes open.
const PIPE_DRAIN_WAIT: Duration = Duration::from_secs(2);

/// Owns every live background process: spawns into a fresh process group,
/// pumps output, waits for exit, and runs the stop and fail-safe ladders.
/// Each launched command gets one watcher task that is the only writer of
/// that command's terminal state.
#[derive(Clone)]
pub(crate) struct ProcessSupervisor {
    registry: Arc<RwLock<CommandRegistry>>,
    events: broadcast::Sender<EngineEvent>,
    limits: LimitsConfig,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Stopped(Option<ExitStatus>),
    TimedOut(Option<ExitStatus>),
}

impl ProcessSupervisor {
    pub(crate) fn new(
        registry: Arc<RwLock<CommandRegistry>>,
        events: broadcast::Sender<EngineEvent>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            registry,
            events,
            limits,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a background command that is already registered as pending.
    /// On success the record is Running, the Running status is published,
    /// and a watcher task owns the child until it reaches a terminal state.
    /// On failure the record is finalized as Failed with the reason; no
    /// Running status is ever published for it.
    pub(crate) async fn launch(
        &self,
        id: &str,
        command_line: &str,
        working_dir: &Path,
        env: Option<&BTreeMap<String, String>>,
    ) -> Result<u32, SpawnFailure> {
        if let Err(failure) = check_working_dir(working_dir).await {
            return Err(self.reject(id, failure));
        }
        let argv = match shell_words::split(command_line) {
            Ok(argv) => argv,
            Err(err) => return Err(self.reject(id, SpawnFailure::Parse(err))),
        };
        let Some((program, args)) = argv.split_first() else {
            return Err(self.reject(id, SpawnFailure::NotFound(command_line.to_string())));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = env {
            command.envs(env);
        }
        process::apply_process_group(&mut command);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return Err(self.reject(id, SpawnFailure::from_io(program, err))),
        };
        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Token goes in before Running is announced, so a stop issued in
        // reaction to the Running event always finds it.
        let cancel = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), cancel.clone());

        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .mark_running(id, Some(pid));
        // Running goes out before the pumps start, so subscribers always see
        // the status change ahead of the first output line.
        let _ = self.events.send(EngineEvent::Status {
            command_id: id.to_string(),
            status: CommandStatus::Running,
            process_id: Some(pid),
        });
        tracing::info!(event = "command.started", id = %id, pid, command = %command_line);

        let sink = OutputSink::new(
            self.registry.clone(),
            self.events.clone(),
            id.to_string(),
            self.limits.max_buffered_lines,
        );
        let io_fault = Arc::new(AtomicBool::new(false));
        let stdout_task = stdout.map(|pipe| {
            tokio::spawn(stream::pump_lines(
                pipe,
                OutputStream::Stdout,
                sink.clone(),
                self.limits.max_line_bytes,
                io_fault.clone(),
            ))
        });
        let stderr_task = stderr.map(|pipe| {
            tokio::spawn(stream::pump_lines(
                pipe,
                OutputStream::Stderr,
                sink.clone(),
                self.limits.max_line_bytes,
                io_fault.clone(),
            ))
        });

        let supervisor = self.clone();
        let command_id = id.to_string();
        tokio::spawn(async move {
            supervisor
                .watch(command_id, child, cancel, sink, io_fault, stdout_task, stderr_task)
                .await;
        });
        Ok(pid)
    }

    #[allow(clippy::too_many_arguments)]
    async fn watch(
        &self,
        id: String,
        mut child: Child,
        cancel: CancellationToken,
        sink: OutputSink,
        io_fault: Arc<AtomicBool>,
        stdout_task: Option<JoinHandle<()>>,
        stderr_task: Option<JoinHandle<()>>,
    ) {
        let started = Instant::now();
        let failsafe = Duration::from_secs(self.limits.failsafe_timeout_secs);
        let grace = Duration::from_secs(self.limits.stop_grace_secs);

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => {
                Outcome::Stopped(process::terminate_child(&mut child, grace).await)
            }
            _ = tokio::time::sleep(failsafe) => {
                sink.push(
                    OutputStream::Stderr,
                    &format!(
                        "command exceeded the {}s running-time limit and was terminated",
                        self.limits.failsafe_timeout_secs
                    ),
                );
                tracing::warn!(event = "command.timed_out", id = %id, limit_secs = self.limits.failsafe_timeout_secs);
                Outcome::TimedOut(process::force_kill(&mut child).await)
            }
        };

        join_pumps(stdout_task, stderr_task).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, exit_code) = match outcome {
            Outcome::Exited(Ok(exit)) => {
                let code = process::exit_code_of(&exit);
                if exit.success() && !io_fault.load(Ordering::Relaxed) {
                    (CommandStatus::Completed, code)
                } else {
                    (CommandStatus::Failed, code)
                }
            }
            Outcome::Exited(Err(err)) => {
                sink.push(OutputStream::Stderr, &format!("process wait failed: {err}"));
                (CommandStatus::Failed, 1)
            }
            Outcome::Stopped(exit) => (
                CommandStatus::Stopped,
                exit.as_ref().map(process::exit_code_of).unwrap_or(-1),
            ),
            Outcome::TimedOut(exit) => (
                CommandStatus::Failed,
                exit.as_ref().map(process::exit_code_of).unwrap_or(1),
            ),
        };
        self.finalize(&id, status, exit_code, duration_ms);
    }

    /// Moves a command to its terminal state and publishes the final Status
    /// and Completed events. Returns false when some other path finalized
    /// the command first; nothing is published then.
    pub(crate) fn finalize(
        &self,
        id: &str,
        status: CommandStatus,
        exit_code: i32,
        duration_ms: u64,
    ) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        let finalized = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .finalize(id, status, exit_code, now_ms());
        let Some(record) = finalized else {
            return false;
        };
        let _ = self.events.send(EngineEvent::Status {
            command_id: record.id.clone(),
            status,
            process_id: record.process_id,
        });
        let _ = self.events.send(EngineEvent::Completed {
            command_id: record.id,
            status,
            exit_code,
            duration_ms,
        });
        tracing::info!(
            event = "command.finished",
            id = %id,
            status = ?status,
            exit_code,
            duration_ms
        );
        true
    }

    /// Requests a graceful stop. True means the command had a live process
    /// and the stop ladder is now running; completion arrives through the
    /// usual events.
    pub(crate) fn stop(&self, id: &str) -> bool {
        let cancel = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        match cancel {
            Some(cancel) => {
                tracing::info!(event = "command.stop_requested", id = %id);
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every live command at once. Terminations proceed in the
    /// background through each command's watcher.
    pub(crate) fn stop_all(&self) -> usize {
        let drained: Vec<CancellationToken> = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            running.drain().map(|(_, cancel)| cancel).collect()
        };
        for cancel in &drained {
            cancel.cancel();
        }
        drained.len()
    }

    fn reject(&self, id: &str, failure: SpawnFailure) -> SpawnFailure {
        tracing::warn!(event = "command.spawn_failed", id = %id, error = %failure);
        // The reason goes into the record only. Running was never announced
        // for this command, so no Output event may be published either.
        let line = OutputLine {
            content: failure.to_string(),
            stream: OutputStream::Stderr,
            at_ms: now_ms(),
        };
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append_line(id, line, self.limits.max_buffered_lines);
        self.finalize(id, CommandStatus::Failed, 1, 0);
        failure
    }
}

async fn check_working_dir(dir: &Path) -> Result<(), SpawnFailure> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SpawnFailure::WorkingDir {
            path: dir.display().to_string(),
            reason: "not a directory".to_string(),
        }),
        Err(err) => Err(SpawnFailure::WorkingDir {
            path: dir.display().to_string(),
            reason: err.to_string(),
        }),
    }
}

async fn join_pumps(stdout_task: Option<JoinHandle<()>>, stderr_task: Option<JoinHandle<()>>) {
    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let mut task = task;
        if tokio::time::timeout(PIPE_DRAIN_WAIT, &mut task).await.is_err() {
            task.abort();
        }
    }
}
