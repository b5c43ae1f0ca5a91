use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ProgramSpec;

/// Seconds to wait for a SIGTERM'd child before escalating to SIGKILL.
pub const TERMINATION_WAIT_SECS: u32 = 30;
/// Seconds to wait for a restarted child to show up as running.
pub const START_WAIT_SECS: u32 = 5;

/// Mutable per-program state. Owned by the supervisor loop; only the
/// lifecycle operations in this module and the heartbeat bookkeeping
/// touch it.
#[derive(Debug, Default)]
pub struct ProgramRuntime {
    /// True from a successful spawn until confirmed termination.
    pub started: bool,
    /// True once the current instance has heartbeated.
    pub first_heartbeat_seen: bool,
    /// OS pid while started, 0 otherwise.
    pub pid: i32,
    /// Monotonic second of the last accepted heartbeat (or of the spawn).
    pub last_heartbeat: u64,
    /// Handle to the running child, used to reap it.
    pub child: Option<Child>,
}

/// Fork/exec one program. The command line is tokenized on ASCII spaces;
/// no shell is involved. The child gets default dispositions for the
/// signals the supervisor overrides.
pub fn spawn(spec: &ProgramSpec, rt: &mut ProgramRuntime) -> io::Result<()> {
    rt.pid = 0;

    let mut tokens = spec.cmd.split_ascii_whitespace();
    let program = tokens.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty command line")
    })?;
    let mut cmd = Command::new(program);
    cmd.args(tokens);

    // SAFETY: the hook only calls signal(2), which is async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            for sig in [
                libc::SIGINT,
                libc::SIGTERM,
                libc::SIGQUIT,
                libc::SIGUSR1,
                libc::SIGUSR2,
            ] {
                libc::signal(sig, libc::SIG_DFL);
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    rt.pid = child.id().map(|p| p as i32).unwrap_or(0);
    rt.child = Some(child);
    rt.started = true;
    rt.first_heartbeat_seen = false;
    Ok(())
}

/// Liveness probe. Reaps the child if it has exited, then falls back to a
/// signal-0 check on the pid. `EPERM` reports alive: the pid exists even
/// though the supervisor may not signal it.
pub fn is_running(name: &str, rt: &mut ProgramRuntime) -> bool {
    if let Some(child) = rt.child.as_mut() {
        match child.try_wait() {
            Ok(Some(status)) => {
                log_exit(name, status);
                rt.child = None;
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                debug!(program = name, error = %e, "wait failed, assuming child is gone");
                rt.child = None;
                return false;
            }
        }
    }

    if rt.pid <= 0 {
        return false;
    }
    probe_pid(name, rt.pid)
}

fn probe_pid(name: &str, pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => {
            warn!(program = name, pid, "no permission to probe process, assuming alive");
            true
        }
        Err(errno) => {
            debug!(program = name, pid, %errno, "process is not running");
            false
        }
    }
}

fn log_exit(name: &str, status: ExitStatus) {
    if let Some(code) = status.code() {
        debug!(program = name, code, "process exited");
    } else if let Some(sig) = status.signal() {
        debug!(program = name, signal = sig, "process killed by signal");
    } else {
        debug!(program = name, "process stopped");
    }
}

/// Graceful-then-forceful termination: SIGTERM, poll for up to
/// `TERMINATION_WAIT_SECS`, then SIGKILL. Runtime state is cleared only
/// once the process is confirmed gone; a pid the supervisor cannot kill
/// keeps its state so the next tick sees it again.
pub async fn terminate(name: &str, rt: &mut ProgramRuntime) {
    if rt.pid <= 0 {
        return;
    }
    debug!(program = name, pid = rt.pid, "terminating process");

    if let Err(errno) = kill(Pid::from_raw(rt.pid), Signal::SIGTERM) {
        if errno != Errno::ESRCH {
            error!(program = name, pid = rt.pid, %errno, "failed to send SIGTERM");
        }
    }

    let mut waited = 0;
    while waited < TERMINATION_WAIT_SECS {
        sleep(Duration::from_secs(1)).await;
        waited += 1;

        match rt.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    log_exit(name, status);
                    rt.child = None;
                    break;
                }
                Ok(None) => debug!(program = name, "process is still running"),
                Err(e) => {
                    debug!(program = name, error = %e, "wait failed, assuming reaped");
                    rt.child = None;
                    break;
                }
            },
            None => {
                if !probe_pid(name, rt.pid) {
                    break;
                }
            }
        }
    }

    let mut killed = !is_running(name, rt);
    if !killed {
        debug!(program = name, pid = rt.pid, "sending SIGKILL");
        match kill(Pid::from_raw(rt.pid), Signal::SIGKILL) {
            Err(errno) if errno != Errno::ESRCH => {
                error!(program = name, pid = rt.pid, %errno, "failed to kill process");
            }
            _ => {
                // SIGKILL delivery is asynchronous; give the kernel a moment.
                for _ in 0..10 {
                    sleep(Duration::from_millis(100)).await;
                    if !is_running(name, rt) {
                        killed = true;
                        break;
                    }
                }
                if killed {
                    info!(program = name, "process killed");
                }
            }
        }
    }

    if killed {
        rt.started = false;
        rt.first_heartbeat_seen = false;
        rt.pid = 0;
        rt.child = None;
        info!(program = name, "process terminated");
    } else {
        error!(program = name, pid = rt.pid, "failed to terminate process");
    }
}

/// Poll for up to `START_WAIT_SECS` until a freshly spawned program shows
/// up as running.
pub async fn await_started(name: &str, rt: &mut ProgramRuntime) -> bool {
    let mut waited = 0;
    while waited < START_WAIT_SECS {
        sleep(Duration::from_secs(1)).await;
        if is_running(name, rt) {
            return true;
        }
        waited += 1;
    }
    is_running(name, rt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cmd: &str) -> ProgramSpec {
        ProgramSpec {
            name: "Test".to_string(),
            cmd: cmd.to_string(),
            start_delay_sec: 0,
            heartbeat_delay_sec: 0,
            heartbeat_interval_sec: 0,
        }
    }

    #[tokio::test]
    async fn spawn_sets_runtime_state() {
        let mut rt = ProgramRuntime::default();
        spawn(&spec("sleep 30"), &mut rt).unwrap();

        assert!(rt.started);
        assert!(!rt.first_heartbeat_seen);
        assert!(rt.pid > 0);
        assert!(is_running("Test", &mut rt));

        terminate("Test", &mut rt).await;
        assert!(!rt.started);
        assert_eq!(rt.pid, 0);
    }

    #[tokio::test]
    async fn crashed_child_reported_not_running() {
        let mut rt = ProgramRuntime::default();
        spawn(&spec("false"), &mut rt).unwrap();

        // Give the child a moment to exit.
        sleep(Duration::from_millis(300)).await;
        assert!(!is_running("Test", &mut rt));
        // State is untouched by the probe; the supervisor scan clears it.
        assert!(rt.started);
    }

    #[tokio::test]
    async fn spawn_nonexistent_binary_fails() {
        let mut rt = ProgramRuntime::default();
        let result = spawn(&spec("/nonexistent/binary --flag"), &mut rt);
        assert!(result.is_err());
        assert_eq!(rt.pid, 0);
    }

    #[tokio::test]
    async fn spawn_empty_command_fails() {
        let mut rt = ProgramRuntime::default();
        assert!(spawn(&spec("   "), &mut rt).is_err());
    }

    #[tokio::test]
    async fn not_started_is_not_running() {
        let mut rt = ProgramRuntime::default();
        assert!(!is_running("Test", &mut rt));
    }

    #[tokio::test]
    async fn terminate_without_pid_is_noop() {
        let mut rt = ProgramRuntime::default();
        terminate("Test", &mut rt).await;
        assert!(!rt.started);
    }

    #[tokio::test]
    async fn terminate_ends_sleeping_child() {
        let mut rt = ProgramRuntime::default();
        spawn(&spec("sleep 600"), &mut rt).unwrap();
        let pid = rt.pid;

        terminate("Test", &mut rt).await;
        assert!(!rt.started);
        assert_eq!(rt.pid, 0);
        // The old pid must be gone.
        assert!(kill(Pid::from_raw(pid), None).is_err());
    }

    #[tokio::test]
    async fn await_started_confirms_running_child() {
        let mut rt = ProgramRuntime::default();
        spawn(&spec("sleep 30"), &mut rt).unwrap();
        assert!(await_started("Test", &mut rt).await);
        terminate("Test", &mut rt).await;
    }

    #[tokio::test]
    async fn command_line_is_tokenized_on_spaces() {
        let mut rt = ProgramRuntime::default();
        // Multiple arguments must survive tokenization.
        spawn(&spec("sleep 30 "), &mut rt).unwrap();
        assert!(is_running("Test", &mut rt));
        terminate("Test", &mut rt).await;
    }
}
