use crate::command::{CommandRecord, CommandStatus, OutputLine};
use crate::error::EngineError;
use std::collections::HashMap;

/// Result of offering an output line to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Appended {
    /// Stored in the record's buffer.
    Stored,
    /// Buffer is full; the line was not stored but may still be published.
    Overflow,
    /// Command unknown or already terminal; the line must be dropped.
    Rejected,
}

/// All known commands, keyed by id. Pure state: callers hold the lock and
/// the registry never performs IO or emits events. Records leave the map
/// only through the explicit clear operations, so finished commands stay
/// inspectable.
#[derive(Debug, Default)]
pub(crate) struct CommandRegistry {
    commands: HashMap<String, CommandRecord>,
}

impl CommandRegistry {
    pub(crate) fn insert(&mut self, record: CommandRecord) -> Result<(), EngineError> {
        if self.commands.contains_key(&record.id) {
            return Err(EngineError::DuplicateCommandId(record.id));
        }
        self.commands.insert(record.id.clone(), record);
        Ok(())
    }

    /// Pending -> Running, recording the OS pid when there is one.
    /// Refused for any other current status.
    pub(crate) fn mark_running(&mut self, id: &str, process_id: Option<u32>) -> bool {
        match self.commands.get_mut(id) {
            Some(record) if record.status == CommandStatus::Pending => {
                record.status = CommandStatus::Running;
                record.process_id = process_id;
                true
            }
            _ => false,
        }
    }

    /// Buffers one output line, up to `max_lines` per command. Once the cap
    /// is hit the record is flagged truncated and later lines are not stored.
    pub(crate) fn append_line(
        &mut self,
        id: &str,
        line: OutputLine,
        max_lines: usize,
    ) -> Appended {
        let Some(record) = self.commands.get_mut(id) else {
            return Appended::Rejected;
        };
        if record.status.is_terminal() {
            return Appended::Rejected;
        }
        if record.output.len() >= max_lines {
            record.output_truncated = true;
            return Appended::Overflow;
        }
        record.output.push(line);
        Appended::Stored
    }

    /// Flags a live command's buffered output as incomplete. Terminal
    /// records are left alone.
    pub(crate) fn mark_output_truncated(&mut self, id: &str) -> bool {
        match self.commands.get_mut(id) {
            Some(record) if !record.status.is_terminal() => {
                record.output_truncated = true;
                true
            }
            _ => false,
        }
    }

    /// Moves a command into a terminal state exactly once, returning a copy
    /// of the finalized record. `None` means the command is unknown or some
    /// other path already finalized it; the caller must then emit nothing.
    pub(crate) fn finalize(
        &mut self,
        id: &str,
        status: CommandStatus,
        exit_code: i32,
        at_ms: u64,
    ) -> Option<CommandRecord> {
        debug_assert!(status.is_terminal());
        let record = self.commands.get_mut(id)?;
        if record.status.is_terminal() {
            return None;
        }
        record.status = status;
        record.exit_code = Some(exit_code);
        record.finished_at_ms = Some(at_ms);
        Some(record.clone())
    }

    pub(crate) fn get(&self, id: &str) -> Option<CommandRecord> {
        self.commands.get(id).cloned()
    }

    pub(crate) fn running(&self) -> Vec<CommandRecord> {
        let mut running: Vec<CommandRecord> = self
            .commands
            .values()
            .filter(|record| record.status == CommandStatus::Running)
            .cloned()
            .collect();
        sort_by_submission(&mut running);
        running
    }

    pub(crate) fn all(&self) -> Vec<CommandRecord> {
        let mut all: Vec<CommandRecord> = self.commands.values().cloned().collect();
        sort_by_submission(&mut all);
        all
    }

    /// Drops every terminal record; running and pending ones stay.
    pub(crate) fn clear_completed(&mut self) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, record| !record.status.is_terminal());
        before - self.commands.len()
    }

    pub(crate) fn clear_all(&mut self) -> usize {
        let count = self.commands.len();
        self.commands.clear();
        count
    }
}

fn sort_by_submission(records: &mut [CommandRecord]) {
    records.sort_by(|a, b| {
        a.started_at_ms
            .cmp(&b.started_at_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
}
