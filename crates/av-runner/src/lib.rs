//! # av-runner
//!
//! Runs one trial of the target command and turns what it printed into a
//! verdict.
//!
//! - [`executor`]: subprocess spawning, timeout and termination
//! - [`process`]: the child lifecycle state machine
//! - [`metric`] / [`oom`]: parsing the child's stdout and stderr
//! - [`which`]: locating optional external programs

pub mod executor;
pub mod metric;
pub mod oom;
pub mod process;
pub mod which;

pub use executor::{ProcessExecutor, TrialExecutor};
pub use metric::{parse_metric, parse_metrics};
pub use oom::looks_like_oom;
pub use process::{ProcessState, DEFAULT_GRACE_PERIOD};
pub use which::find_executable;

use av_types::{Config, TrialOutcome, TrialRecord};

/// Attach the config and parsed metric to a raw outcome.
pub fn classify(
    index: usize,
    config: Config,
    outcome: TrialOutcome,
    metric_name: &str,
) -> TrialRecord {
    let metric_value = parse_metric(&outcome.stdout, metric_name);
    TrialRecord::new(index, config, outcome, metric_value)
}
