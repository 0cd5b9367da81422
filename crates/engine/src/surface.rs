use async_trait::async_trait;
use std::path::Path;

/// Destination for interactive commands. Implementations present the command
/// in some user-facing terminal and start it there; the engine keeps no
/// process handle and captures no output for these, and synthesizes
/// completion after a settle delay.
///
/// Returning an error means the command never started; the engine finalizes
/// it as failed.
#[async_trait]
pub trait InteractiveSurface: Send + Sync {
    async fn display_and_run(&self, command_line: &str, working_dir: &Path) -> anyhow::Result<()>;
}
