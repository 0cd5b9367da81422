mod cli;
mod logging;
mod terminal;

use crate::cli::{Args, CliCommand};
use anyhow::Context;
use clap::Parser;
use overseer_engine::{
    CommandStatus, EngineConfig, EngineEvent, ExecuteOptions, ExecutionEngine, OutputStream,
    RiskLevel,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_guard = logging::init_tracing(args.log_dir.as_deref(), args.log_to_stderr)?;

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let exit_code = match args.command {
        CliCommand::Run {
            command,
            cwd,
            env,
            interactive,
            json,
        } => run(config, &command.join(" "), cwd, &env, interactive, json).await?,
        CliCommand::Classify { command, json } => {
            classify(config, &command.join(" "), json)?;
            0
        }
    };

    // flush the rolling-file worker before exiting
    drop(log_guard);
    std::process::exit(exit_code);
}

async fn run(
    config: EngineConfig,
    command_line: &str,
    cwd: Option<PathBuf>,
    env_pairs: &[String],
    interactive: bool,
    json: bool,
) -> anyhow::Result<i32> {
    let engine = ExecutionEngine::with_surface(config, Arc::new(terminal::TerminalSurface))
        .context("engine configuration rejected")?;
    let mut events = engine.subscribe();

    let mut options = if interactive {
        ExecuteOptions::interactive()
    } else {
        ExecuteOptions::background()
    };
    options.working_dir = cwd;
    options.env = parse_env(env_pairs)?;

    let result = engine.execute_command(command_line, options).await?;
    if !result.success {
        if json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            let reason = result.error.as_deref().unwrap_or("command could not start");
            eprintln!("{}: {reason}", result.command_id);
        }
        let code = engine
            .get_command(&result.command_id)
            .and_then(|record| record.exit_code)
            .unwrap_or(1);
        return Ok(normalize_exit_code(code));
    }
    info!(event = "cli.command_accepted", id = %result.command_id);

    // Ctrl-C asks the engine for a graceful stop; the stop ladder escalates
    // on its own if the process ignores it.
    {
        let engine = engine.clone();
        let command_id = result.command_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(event = "cli.interrupt", id = %command_id);
                engine.stop_command(&command_id);
            }
        });
    }

    stream_until_complete(&mut events, &result.command_id, json).await
}

async fn stream_until_complete(
    events: &mut broadcast::Receiver<EngineEvent>,
    command_id: &str,
    json: bool,
) -> anyhow::Result<i32> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(event = "cli.events_lagged", missed);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("event stream closed before the command finished")
            }
        };
        if event.command_id() != command_id {
            continue;
        }
        if json {
            println!("{}", serde_json::to_string(&event)?);
        }
        match event {
            EngineEvent::Output { line, .. } if !json => match line.stream {
                OutputStream::Stdout => println!("{}", line.content),
                OutputStream::Stderr => eprintln!("{}", line.content),
            },
            EngineEvent::Completed {
                status,
                exit_code,
                duration_ms,
                ..
            } => {
                if !json {
                    eprintln!(
                        "{command_id}: {} (exit {exit_code}) after {}",
                        status_label(status),
                        humantime::format_duration(Duration::from_millis(duration_ms))
                    );
                }
                return Ok(normalize_exit_code(exit_code));
            }
            _ => {}
        }
    }
}

fn classify(config: EngineConfig, command_line: &str, json: bool) -> anyhow::Result<()> {
    let engine = ExecutionEngine::new(config).context("engine configuration rejected")?;
    let classification = engine.classify(command_line);
    if json {
        println!("{}", serde_json::to_string(&classification)?);
        return Ok(());
    }
    let risk = match classification.risk_level {
        RiskLevel::Safe => "safe",
        RiskLevel::Moderate => "moderate",
        RiskLevel::Dangerous => "dangerous",
    };
    println!("risk: {risk}");
    println!("hidden: {}", classification.hidden);
    Ok(())
}

fn parse_env(pairs: &[String]) -> anyhow::Result<Option<BTreeMap<String, String>>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut env = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid --env {pair:?}, expected KEY=VALUE"))?;
        if key.is_empty() {
            anyhow::bail!("invalid --env {pair:?}, empty key");
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(Some(env))
}

fn status_label(status: CommandStatus) -> &'static str {
    match status {
        CommandStatus::Completed => "completed",
        CommandStatus::Failed => "failed",
        CommandStatus::Stopped => "stopped",
        CommandStatus::Pending | CommandStatus::Running => "running",
    }
}

/// Shells only see 0-255; unknown codes become a plain failure.
fn normalize_exit_code(code: i32) -> i32 {
    if code < 0 {
        1
    } else {
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_parse_into_a_map() {
        let env = parse_env(&["A=1".to_string(), "PATH=/bin:/usr/bin".to_string()])
            .expect("valid pairs")
            .expect("non-empty");
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/bin:/usr/bin"));
    }

    #[test]
    fn empty_env_list_means_no_overrides() {
        assert!(parse_env(&[]).expect("valid").is_none());
    }

    #[test]
    fn malformed_env_pairs_are_rejected() {
        assert!(parse_env(&["NOVALUE".to_string()]).is_err());
        assert!(parse_env(&["=value".to_string()]).is_err());
    }

    #[test]
    fn exit_codes_stay_in_shell_range() {
        assert_eq!(normalize_exit_code(0), 0);
        assert_eq!(normalize_exit_code(137), 137);
        assert_eq!(normalize_exit_code(-1), 1);
    }
}
