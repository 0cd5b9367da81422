use std::time::{Duration, Instant};

use overseer_engine::{
    CommandStatus, EngineConfig, EngineEvent, ExecuteOptions, ExecutionEngine, OutputStream,
    RiskLevel,
};
use tokio::sync::broadcast;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(10);

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.limits.stop_grace_secs = 1;
    config.limits.interactive_settle_ms = 50;
    config
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(fast_config()).expect("default config is valid")
}

/// Collects every event for one command, in order, up to and including its
/// Completed event.
async fn events_for(
    rx: &mut broadcast::Receiver<EngineEvent>,
    command_id: &str,
) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(DEADLINE, rx.recv())
            .await
            .expect("event before deadline")
            .expect("event channel open");
        if event.command_id() != command_id {
            continue;
        }
        let done = matches!(event, EngineEvent::Completed { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn echo_lifecycle_keeps_event_order() {
    let engine = engine();
    let mut rx = engine.subscribe();

    let result = engine
        .execute_command("echo hello world", ExecuteOptions::background())
        .await
        .expect("accepted");
    assert!(result.success);
    assert_eq!(result.status, CommandStatus::Running);

    let events = events_for(&mut rx, &result.command_id).await;

    // Running first, then output, then the terminal pair.
    assert!(matches!(
        events.first(),
        Some(EngineEvent::Status {
            status: CommandStatus::Running,
            process_id: Some(_),
            ..
        })
    ));
    let output_at = events
        .iter()
        .position(|event| matches!(event, EngineEvent::Output { .. }))
        .expect("output event present");
    assert!(output_at > 0);
    match &events[events.len() - 2] {
        EngineEvent::Status { status, .. } => assert_eq!(*status, CommandStatus::Completed),
        other => panic!("expected terminal status, got {other:?}"),
    }
    match events.last() {
        Some(EngineEvent::Completed {
            status, exit_code, ..
        }) => {
            assert_eq!(*status, CommandStatus::Completed);
            assert_eq!(*exit_code, 0);
        }
        other => panic!("expected completed, got {other:?}"),
    }

    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.status, CommandStatus::Completed);
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.output.len(), 1);
    assert_eq!(record.output[0].content, "hello world");
    let finished = record.finished_at_ms.expect("finished timestamp");
    assert!(finished >= record.started_at_ms);
}

#[tokio::test]
async fn stdout_and_stderr_keep_their_labels() {
    let engine = engine();
    let mut rx = engine.subscribe();

    let result = engine
        .execute_command(
            "sh -c \"echo to-out; echo to-err 1>&2\"",
            ExecuteOptions::background(),
        )
        .await
        .expect("accepted");
    events_for(&mut rx, &result.command_id).await;

    let record = engine.get_command(&result.command_id).expect("present");
    let out: Vec<_> = record
        .output
        .iter()
        .filter(|line| line.stream == OutputStream::Stdout)
        .collect();
    let err: Vec<_> = record
        .output
        .iter()
        .filter(|line| line.stream == OutputStream::Stderr)
        .collect();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].content, "to-out");
    assert_eq!(err.len(), 1);
    assert_eq!(err[0].content, "to-err");
}

#[tokio::test]
async fn raw_bytes_in_the_output_do_not_derail_the_command() {
    let engine = engine();
    let mut rx = engine.subscribe();

    // \377 is not valid UTF-8 on its own; the line still has to flow, and
    // everything after it too
    let result = engine
        .execute_command(
            "sh -c \"printf 'bad\\377line\\n'; echo after; exit 0\"",
            ExecuteOptions::background(),
        )
        .await
        .expect("accepted");
    let events = events_for(&mut rx, &result.command_id).await;
    match events.last() {
        Some(EngineEvent::Completed {
            status, exit_code, ..
        }) => {
            assert_eq!(*status, CommandStatus::Completed);
            assert_eq!(*exit_code, 0);
        }
        other => panic!("expected completed, got {other:?}"),
    }

    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.status, CommandStatus::Completed);
    let contents: Vec<&str> = record
        .output
        .iter()
        .map(|line| line.content.as_str())
        .collect();
    assert_eq!(contents, vec!["bad\u{fffd}line", "after"]);
}

#[tokio::test]
async fn overlong_line_is_cut_but_the_command_still_completes() {
    let mut config = fast_config();
    config.limits.max_line_bytes = 4096;
    let engine = ExecutionEngine::new(config).expect("config valid");
    let mut rx = engine.subscribe();

    // 200 kB with no newline, then a short line
    let result = engine
        .execute_command(
            "sh -c \"head -c 200000 /dev/zero | tr '\\0' x; echo; echo done\"",
            ExecuteOptions::background(),
        )
        .await
        .expect("accepted");
    let events = events_for(&mut rx, &result.command_id).await;
    match events.last() {
        Some(EngineEvent::Completed {
            status, exit_code, ..
        }) => {
            assert_eq!(*status, CommandStatus::Completed);
            assert_eq!(*exit_code, 0);
        }
        other => panic!("expected completed, got {other:?}"),
    }

    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.output.len(), 2);
    let flood = &record.output[0].content;
    assert!(flood.starts_with("xxxx"));
    assert!(flood.ends_with("[line truncated]"));
    assert!(flood.len() <= 4096 + 32, "stored {} bytes", flood.len());
    assert_eq!(record.output[1].content, "done");
    assert!(record.output_truncated);
}

#[tokio::test]
async fn nonzero_exit_code_is_preserved() {
    let engine = engine();
    let mut rx = engine.subscribe();

    let result = engine
        .execute_command("sh -c \"exit 7\"", ExecuteOptions::background())
        .await
        .expect("accepted");
    let events = events_for(&mut rx, &result.command_id).await;
    match events.last() {
        Some(EngineEvent::Completed {
            status, exit_code, ..
        }) => {
            assert_eq!(*status, CommandStatus::Failed);
            assert_eq!(*exit_code, 7);
        }
        other => panic!("expected completed, got {other:?}"),
    }
    assert_eq!(
        engine.get_command(&result.command_id).expect("present").exit_code,
        Some(7)
    );
}

#[tokio::test]
async fn missing_binary_never_reports_running() {
    let engine = engine();
    let mut rx = engine.subscribe();

    let result = engine
        .execute_command(
            "surely-not-installed-anywhere-f3a9",
            ExecuteOptions::background(),
        )
        .await
        .expect("tracked");
    assert!(!result.success);
    assert_eq!(result.status, CommandStatus::Failed);
    let message = result.error.as_deref().expect("failure reason");
    assert!(message.contains("not found"), "unexpected message: {message}");

    let events = events_for(&mut rx, &result.command_id).await;
    for event in &events {
        match event {
            EngineEvent::Status { status, .. } => assert_ne!(*status, CommandStatus::Running),
            EngineEvent::Output { .. } => panic!("output event for a command that never ran"),
            _ => {}
        }
    }

    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.status, CommandStatus::Failed);
    assert_eq!(record.exit_code, Some(1));
    assert!(record.process_id.is_none());
    // the reason still lands in the record's buffered output
    assert!(record
        .output
        .iter()
        .any(|line| line.content.contains("not found")));
}

#[tokio::test]
async fn stop_request_beats_the_sleep() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let started = Instant::now();

    let result = engine
        .execute_command("sleep 30", ExecuteOptions::background())
        .await
        .expect("accepted");
    assert!(engine.stop_command(&result.command_id));

    let events = events_for(&mut rx, &result.command_id).await;
    match events.last() {
        Some(EngineEvent::Completed { status, .. }) => {
            assert_eq!(*status, CommandStatus::Stopped)
        }
        other => panic!("expected completed, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));

    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.status, CommandStatus::Stopped);
    assert!(record.exit_code.is_some());

    // nothing left to stop
    assert!(!engine.stop_command(&result.command_id));
}

#[tokio::test]
async fn stopping_unknown_commands_reports_false() {
    let engine = engine();
    assert!(!engine.stop_command("never-submitted"));
}

#[tokio::test]
async fn stop_escalates_when_the_graceful_signal_is_ignored() {
    let engine = engine();
    let mut rx = engine.subscribe();
    let started = Instant::now();

    // the shell ignores TERM and restarts its sleep, so only the forced
    // kill at the grace deadline ends it
    let result = engine
        .execute_command(
            "sh -c \"trap '' TERM; while true; do sleep 1; done\"",
            ExecuteOptions::background(),
        )
        .await
        .expect("accepted");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.stop_command(&result.command_id));

    let events = events_for(&mut rx, &result.command_id).await;
    match events.last() {
        Some(EngineEvent::Completed { status, .. }) => {
            assert_eq!(*status, CommandStatus::Stopped)
        }
        other => panic!("expected completed, got {other:?}"),
    }
    // forced kill fired at the 1s grace deadline, well before the sleep ends
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        engine.get_command(&result.command_id).expect("present").status,
        CommandStatus::Stopped
    );
}

#[tokio::test]
async fn failsafe_limit_fails_a_runaway_command() {
    let mut config = fast_config();
    config.limits.failsafe_timeout_secs = 1;
    let engine = ExecutionEngine::new(config).expect("config valid");
    let mut rx = engine.subscribe();

    let result = engine
        .execute_command("sleep 600", ExecuteOptions::background())
        .await
        .expect("accepted");
    let events = events_for(&mut rx, &result.command_id).await;
    match events.last() {
        Some(EngineEvent::Completed { status, .. }) => assert_eq!(*status, CommandStatus::Failed),
        other => panic!("expected completed, got {other:?}"),
    }

    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.status, CommandStatus::Failed);
    assert!(record
        .output
        .iter()
        .any(|line| line.stream == OutputStream::Stderr
            && line.content.contains("running-time limit")));
}

#[tokio::test]
async fn every_subscriber_sees_the_same_events() {
    let engine = engine();
    let mut first = engine.subscribe();
    let mut second = engine.subscribe();

    let result = engine
        .execute_command("echo fan-out", ExecuteOptions::background())
        .await
        .expect("accepted");

    let seen_first = events_for(&mut first, &result.command_id).await;
    let seen_second = events_for(&mut second, &result.command_id).await;
    assert_eq!(seen_first.len(), seen_second.len());
    for (a, b) in seen_first.iter().zip(seen_second.iter()) {
        assert_eq!(
            serde_json::to_string(a).expect("serialize"),
            serde_json::to_string(b).expect("serialize")
        );
    }
}

#[tokio::test]
async fn nothing_follows_the_completed_event() {
    let engine = engine();
    let mut rx = engine.subscribe();

    // the backgrounded subshell outlives the shell and keeps the pipes
    // open, so completion comes through the pipe-drain deadline
    let result = engine
        .execute_command(
            "sh -c \"(sleep 3; echo late) &\"",
            ExecuteOptions::background(),
        )
        .await
        .expect("accepted");
    let events = events_for(&mut rx, &result.command_id).await;
    match events.last() {
        Some(EngineEvent::Completed { status, .. }) => {
            assert_eq!(*status, CommandStatus::Completed)
        }
        other => panic!("expected completed, got {other:?}"),
    }

    // the stream stays quiet once Completed is out
    let extra = timeout(Duration::from_millis(1500), rx.recv()).await;
    assert!(extra.is_err(), "event after completion: {extra:?}");
}

#[tokio::test]
async fn working_directory_is_applied() {
    let dir = tempfile::tempdir().expect("tempdir");
    let canonical = dir.path().canonicalize().expect("canonicalize");

    let engine = engine();
    let mut rx = engine.subscribe();
    let mut options = ExecuteOptions::background();
    options.working_dir = Some(dir.path().to_path_buf());

    let result = engine
        .execute_command("pwd", options)
        .await
        .expect("accepted");
    events_for(&mut rx, &result.command_id).await;

    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.output.len(), 1);
    assert_eq!(record.output[0].content, canonical.display().to_string());
}

#[tokio::test]
async fn listings_track_live_and_finished_commands() {
    let engine = engine();
    let mut rx = engine.subscribe();

    let quick = engine
        .execute_command("echo quick", ExecuteOptions::background())
        .await
        .expect("accepted");
    let slow = engine
        .execute_command("sleep 30", ExecuteOptions::background())
        .await
        .expect("accepted");
    events_for(&mut rx, &quick.command_id).await;

    assert_eq!(engine.all_commands().len(), 2);
    let running: Vec<String> = engine
        .running_commands()
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(running, vec![slow.command_id.clone()]);

    assert_eq!(engine.clear_completed(), 1);
    assert!(engine.get_command(&quick.command_id).is_none());
    assert!(engine.get_command(&slow.command_id).is_some());

    engine.stop_command(&slow.command_id);
    events_for(&mut rx, &slow.command_id).await;
}

#[tokio::test]
async fn risk_and_visibility_ride_along_on_records() {
    let engine = engine();
    let mut rx = engine.subscribe();

    // dangerous but still executed; /nonexistent keeps it harmless
    let result = engine
        .execute_command("sudo ls /nonexistent", ExecuteOptions::background())
        .await
        .expect("tracked");
    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.risk_level, RiskLevel::Dangerous);

    let result = engine
        .execute_command("echo noise", ExecuteOptions::background())
        .await
        .expect("accepted");
    let record = engine.get_command(&result.command_id).expect("present");
    assert_eq!(record.risk_level, RiskLevel::Safe);
    assert!(record.hidden);
    events_for(&mut rx, &result.command_id).await;
}

#[tokio::test]
async fn dispose_stops_and_forgets_everything() {
    let engine = engine();

    let first = engine
        .execute_command("sleep 30", ExecuteOptions::background())
        .await
        .expect("accepted");
    let second = engine
        .execute_command("sleep 30", ExecuteOptions::background())
        .await
        .expect("accepted");
    assert_eq!(engine.running_commands().len(), 2);

    engine.dispose();
    assert!(engine.get_command(&first.command_id).is_none());
    assert!(engine.get_command(&second.command_id).is_none());
    assert!(engine.all_commands().is_empty());
    assert!(engine.running_commands().is_empty());

    // disposing twice is harmless, and the engine still accepts work
    engine.dispose();
    let result = engine
        .execute_command("echo revived", ExecuteOptions::background())
        .await
        .expect("accepted");
    assert!(result.success);
}
