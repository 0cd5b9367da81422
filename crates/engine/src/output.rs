use crate::command::{now_ms, OutputLine, OutputStream};
use crate::events::EngineEvent;
use crate::registry::{Appended, CommandRegistry};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Per-command output funnel: stores a line in the registry, then publishes
/// it as an event. Cheap to clone; the stdout and stderr pumps each hold one.
#[derive(Clone)]
pub(crate) struct OutputSink {
    registry: Arc<RwLock<CommandRegistry>>,
    events: broadcast::Sender<EngineEvent>,
    command_id: String,
    max_lines: usize,
}

impl OutputSink {
    pub(crate) fn new(
        registry: Arc<RwLock<CommandRegistry>>,
        events: broadcast::Sender<EngineEvent>,
        command_id: String,
        max_lines: usize,
    ) -> Self {
        Self {
            registry,
            events,
            command_id,
            max_lines,
        }
    }

    /// Records one line of process output. Blank lines are dropped. Lines
    /// past the buffer cap are still published so live subscribers miss
    /// nothing; lines arriving after the command went terminal are dropped
    /// entirely.
    pub(crate) fn push(&self, stream: OutputStream, content: &str) {
        if content.trim().is_empty() {
            return;
        }
        let line = OutputLine {
            content: content.to_string(),
            stream,
            at_ms: now_ms(),
        };
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.append_line(&self.command_id, line.clone(), self.max_lines) {
            Appended::Stored | Appended::Overflow => {
                // Sent while the lock is held: finalization takes the same
                // lock before it publishes the terminal events, so a line
                // accepted here is never delivered after them. No receivers
                // is fine, the send result is irrelevant.
                let _ = self.events.send(EngineEvent::Output {
                    command_id: self.command_id.clone(),
                    line,
                });
            }
            Appended::Rejected => {}
        }
    }

    /// Flags the record's stored output as incomplete. No event goes out.
    pub(crate) fn mark_truncated(&self) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .mark_output_truncated(&self.command_id);
    }
}
