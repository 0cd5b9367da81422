use anyhow::Context;
use async_trait::async_trait;
use overseer_engine::InteractiveSurface;
use std::path::Path;

/// The caller's own terminal as the interactive surface. The command runs
/// with inherited stdio and holds the terminal until it exits; the engine
/// never sees its output or exit code.
pub(crate) struct TerminalSurface;

#[async_trait]
impl InteractiveSurface for TerminalSurface {
    async fn display_and_run(&self, command_line: &str, working_dir: &Path) -> anyhow::Result<()> {
        let argv = shell_words::split(command_line)
            .with_context(|| format!("unparsable command line {command_line:?}"))?;
        let (program, args) = argv.split_first().context("empty command line")?;
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .spawn()
            .with_context(|| format!("failed to start {program}"))?;
        let status = child
            .wait()
            .await
            .context("lost track of the interactive command")?;
        // a nonzero exit still counts as started; that is the session's own
        // business, not a hand-off failure
        tracing::debug!(event = "cli.interactive_exit", success = status.success());
        Ok(())
    }
}
