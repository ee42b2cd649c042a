//! Child lifecycle supervision.
//!
//! A trial child moves through `Running → Terminating → Killed`; it can exit
//! from any of those states. [`supervise`] only returns once the child has
//! been reaped, so callers never build an outcome for a live process.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// Grace period between the termination signal and the forced kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Deadline passed and the termination signal was sent.
    Terminating,
    /// Grace period elapsed and the kill signal was sent.
    Killed,
}

/// How supervision ended.
#[derive(Debug)]
pub struct Supervision {
    pub status: Option<ExitStatus>,
    /// State the child was in when it was reaped.
    pub final_state: ProcessState,
}

impl Supervision {
    pub fn timed_out(&self) -> bool {
        self.final_state != ProcessState::Running
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

pub async fn supervise(child: &mut Child, timeout: Duration, grace: Duration) -> Supervision {
    let mut state = ProcessState::Running;
    loop {
        match state {
            ProcessState::Running => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => return reaped(status, state),
                Err(_) => {
                    debug!(pid = ?child.id(), ?timeout, "trial deadline elapsed, terminating");
                    terminate(child);
                    state = ProcessState::Terminating;
                }
            },
            ProcessState::Terminating => match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return reaped(status, state),
                Err(_) => {
                    warn!(pid = ?child.id(), ?grace, "child ignored termination, killing");
                    kill(child);
                    state = ProcessState::Killed;
                }
            },
            ProcessState::Killed => return reaped(child.wait().await, state),
        }
    }
}

fn reaped(status: std::io::Result<ExitStatus>, state: ProcessState) -> Supervision {
    let status = match status {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("failed to wait for child: {}", e);
            None
        }
    };
    Supervision {
        status,
        final_state: state,
    }
}

#[cfg(unix)]
mod signals {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    use tracing::warn;

    /// Signal the whole process group led by `pid`. Returns false when no
    /// member of the group is left.
    pub fn signal_group(pid: u32, signal: Signal) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match killpg(Pid::from_raw(raw), signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!(pid, ?signal, "failed to signal process group: {}", e);
                false
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        signals::signal_group(pid, nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    // no graceful signal available; escalation to kill happens after the grace period
    let _ = child;
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signals::signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    }
    if let Err(e) = child.start_kill() {
        debug!("start_kill after group kill: {}", e);
    }
}

/// Kill whatever is left of the trial's process group after the leader exited.
#[cfg(unix)]
pub fn reap_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        if signals::signal_group(pid, nix::sys::signal::Signal::SIGKILL) {
            debug!(pid, "killed leftover processes in trial group");
        }
    }
}

#[cfg(not(unix))]
pub fn reap_group(_pid: Option<u32>) {}
