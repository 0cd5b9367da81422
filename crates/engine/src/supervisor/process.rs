use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

const KILL_WAIT: Duration = Duration::from_secs(2);

#[cfg(unix)]
pub(super) fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(super) fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_child(child: &mut Child, signal: i32) {
    if let Some(pid) = child.id() {
        unsafe {
            // negative pid: the whole process group, descendants included
            libc::kill(-(pid as i32), signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_child(_child: &mut Child, _signal: i32) {}

/// Graceful stop: termination signal first, then after `grace` a hard kill.
/// Returns the exit status when the process was reaped in time.
pub(super) async fn terminate_child(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    signal_child(child, libc::SIGTERM);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            signal_child(child, libc::SIGKILL);
            let _ = child.kill().await;
            match tokio::time::timeout(KILL_WAIT, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => None,
            }
        }
    }
}

/// Immediate kill with no grace, for commands past their running-time bound.
pub(super) async fn force_kill(child: &mut Child) -> Option<ExitStatus> {
    signal_child(child, libc::SIGKILL);
    let _ = child.kill().await;
    match tokio::time::timeout(KILL_WAIT, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => None,
    }
}

/// Shell-convention exit code: the real code when there is one, 128 plus the
/// signal number for signal deaths, -1 when the platform reports neither.
pub(super) fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
