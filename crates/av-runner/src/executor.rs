//! Trial execution: one supervised child per call.

use async_trait::async_trait;
use av_types::TrialOutcome;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::oom::looks_like_oom;
use crate::process::{self, ProcessState, DEFAULT_GRACE_PERIOD};

/// Runs the target command once and reports what happened.
///
/// Implementations never fail: every problem, including an unstartable
/// command, is folded into the returned [`TrialOutcome`].
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
        cwd: &Path,
    ) -> TrialOutcome;
}

/// Executes trials as real subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    grace_period: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

#[async_trait]
impl TrialExecutor for ProcessExecutor {
    async fn execute(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
        cwd: &Path,
    ) -> TrialOutcome {
        let start = Instant::now();

        // split like a POSIX shell would, but never run one
        let args = match shlex::split(command) {
            Some(args) if !args.is_empty() => args,
            _ => {
                return TrialOutcome::spawn_failed(
                    format!("could not parse command: {command:?}"),
                    start.elapsed(),
                )
            }
        };

        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..])
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %args[0], "failed to spawn trial: {}", e);
                return TrialOutcome::spawn_failed(format!("{}: {}", args[0], e), start.elapsed());
            }
        };
        let pid = child.id();
        debug!(?pid, %command, "trial started");

        let stdout = StreamCapture::spawn(child.stdout.take());
        let stderr = StreamCapture::spawn(child.stderr.take());

        let supervision = process::supervise(&mut child, timeout, self.grace_period).await;
        process::reap_group(pid);

        // Pipes may be held open by stray grandchildren; bound the drain.
        let stdout = stdout.finish(self.grace_period).await;
        let stderr = stderr.finish(self.grace_period).await;

        let timed_out = supervision.timed_out();
        if supervision.final_state == ProcessState::Killed {
            info!(?pid, "trial was force-killed after the grace period");
        }

        let oom = looks_like_oom(&stderr);
        TrialOutcome::new(
            supervision.exit_code(),
            timed_out,
            oom,
            stdout,
            stderr,
            start.elapsed(),
        )
    }
}

/// Background reader that keeps whatever a stream produced, even if it is
/// abandoned before EOF.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    fn spawn<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!("stream read failed: {}", e);
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    async fn finish(self, wait: Duration) -> String {
        let mut task = self.task;
        if tokio::time::timeout(wait, &mut task).await.is_err() {
            debug!("stream still open after the child exited, abandoning reader");
            task.abort();
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
