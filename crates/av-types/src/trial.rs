//! Trial outcomes, classified records and per-template search results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;

pub const NOTE_METRIC_MISSING: &str = "Metric not found in stdout";

/// Raw result of executing one subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    /// Clean exit, no timeout and no OOM signature. Says nothing about metrics.
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub oom: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_s: f64,
    /// Set when the child could not be started at all.
    pub spawn_error: Option<String>,
}

impl TrialOutcome {
    pub fn new(
        exit_code: Option<i32>,
        timed_out: bool,
        oom: bool,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        let ok = !timed_out && exit_code == Some(0) && !oom;
        Self {
            ok,
            exit_code,
            timed_out,
            oom,
            stdout,
            stderr,
            duration_s: duration.as_secs_f64(),
            spawn_error: None,
        }
    }

    pub fn spawn_failed(error: impl Into<String>, duration: Duration) -> Self {
        let error = error.into();
        Self {
            ok: false,
            exit_code: None,
            timed_out: false,
            oom: false,
            stdout: String::new(),
            stderr: error.clone(),
            duration_s: duration.as_secs_f64(),
            spawn_error: Some(error),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_s.max(0.0))
    }
}

/// Why a trial was not ok. Ordered by precedence when several apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    SpawnFailed,
    TimedOut,
    OutOfMemory,
    ExitCode(i32),
    /// Exited without a code, i.e. killed by a signal we did not send.
    Signaled,
    MetricMissing,
}

impl FailureKind {
    /// Short status label used in trial listings. Only timeouts and OOMs
    /// get their own label; every other failure is `BAD`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TimedOut => "TIMEOUT",
            Self::OutOfMemory => "OOM",
            Self::SpawnFailed | Self::ExitCode(_) | Self::Signaled | Self::MetricMissing => "BAD",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed => f.write_str("process could not be spawned"),
            Self::TimedOut => f.write_str("timed out"),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::ExitCode(code) => write!(f, "exited with code {code}"),
            Self::Signaled => f.write_str("terminated by signal"),
            Self::MetricMissing => f.write_str("metric missing"),
        }
    }
}

/// A trial outcome together with the config it ran under and its verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: Uuid,
    /// 1-based, session-wide trial index.
    pub index: usize,
    pub config: Config,
    /// Outcome ok and a metric value was found.
    pub ok: bool,
    pub metric_value: Option<f64>,
    pub outcome: TrialOutcome,
    pub notes: Vec<String>,
    pub artifacts_dir: Option<PathBuf>,
}

impl TrialRecord {
    pub fn new(
        index: usize,
        config: Config,
        outcome: TrialOutcome,
        metric_value: Option<f64>,
    ) -> Self {
        let mut notes = Vec::new();
        if let Some(err) = &outcome.spawn_error {
            notes.push(format!("Failed to spawn process: {err}"));
        }
        if outcome.timed_out {
            notes.push(format!(
                "Timed out after {:.1}s and was terminated",
                outcome.duration_s
            ));
        }
        if metric_value.is_none() {
            notes.push(NOTE_METRIC_MISSING.to_string());
        }

        Self {
            id: Uuid::new_v4(),
            index,
            ok: outcome.ok && metric_value.is_some(),
            config,
            metric_value,
            outcome,
            notes,
            artifacts_dir: None,
        }
    }

    pub fn batch_size(&self) -> u32 {
        self.config.batch_size
    }

    pub fn timed_out(&self) -> bool {
        self.outcome.timed_out
    }

    pub fn oom(&self) -> bool {
        self.outcome.oom
    }

    pub fn failure(&self) -> Option<FailureKind> {
        if self.ok {
            return None;
        }
        let outcome = &self.outcome;
        let kind = if outcome.spawn_error.is_some() {
            FailureKind::SpawnFailed
        } else if outcome.timed_out {
            FailureKind::TimedOut
        } else if outcome.oom {
            FailureKind::OutOfMemory
        } else {
            match outcome.exit_code {
                Some(0) => FailureKind::MetricMissing,
                Some(code) => FailureKind::ExitCode(code),
                None => FailureKind::Signaled,
            }
        };
        Some(kind)
    }

    pub fn status_label(&self) -> &'static str {
        self.failure().map(|f| f.label()).unwrap_or("OK")
    }
}

/// Final binary-search bracket: `lo` passed, `hi` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub lo: u32,
    pub hi: u32,
}

impl Bracket {
    pub fn width(&self) -> u32 {
        self.hi.saturating_sub(self.lo)
    }
}

/// Everything one batch-size search produced for a single template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub template: Config,
    pub trials: Vec<TrialRecord>,
    /// Position in `trials` of the best ok trial.
    pub best_index: Option<usize>,
    pub bracket: Option<Bracket>,
}

impl SearchResult {
    pub fn best(&self) -> Option<&TrialRecord> {
        self.best_index.and_then(|i| self.trials.get(i))
    }

    pub fn best_config(&self) -> Option<&Config> {
        self.best().map(|r| &r.config)
    }

    pub fn ok_trials(&self) -> impl Iterator<Item = &TrialRecord> {
        self.trials.iter().filter(|r| r.ok)
    }
}
