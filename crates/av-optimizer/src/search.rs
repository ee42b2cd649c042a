//! Batch-size search for a single candidate template.
//!
//! The feasibility boundary is unknown up front, so the search first grows the
//! batch size exponentially until something fails, then bisects between the
//! last passing and first failing size. Both phases draw from one trial
//! budget. The reported best is the ok trial with the highest metric across
//! *all* trials, not the final bracket edge: a bigger batch is not guaranteed
//! to be faster.

use av_data::ArtifactRecorder;
use av_runner::{classify, TrialExecutor};
use av_types::{Bracket, Config, SearchResult, SessionContext, TrialRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Limits for one search invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// First batch size tried; values below 1 are treated as 1.
    pub min_batch_size: u32,
    /// Trials allowed per template, shared by both phases.
    pub max_trials: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_trials: 25,
        }
    }
}

/// Drives trials for one session, one template at a time.
///
/// Trials run strictly one after another: concurrent trials would compete
/// for the very memory being measured.
pub struct SearchController<E: TrialExecutor> {
    executor: E,
    recorder: Option<ArtifactRecorder>,
    context: SessionContext,
    command: String,
    settings: SearchSettings,
    /// Session-wide trial counter; never reset between templates.
    trials_run: usize,
}

impl<E: TrialExecutor> SearchController<E> {
    pub fn new(
        executor: E,
        context: SessionContext,
        command: impl Into<String>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            executor,
            recorder: None,
            context,
            command: command.into(),
            settings,
            trials_run: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: ArtifactRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn settings(&self) -> SearchSettings {
        self.settings
    }

    pub fn recorder(&self) -> Option<&ArtifactRecorder> {
        self.recorder.as_ref()
    }

    pub fn trials_run(&self) -> usize {
        self.trials_run
    }

    /// Search the batch size for `template`.
    pub async fn search(&mut self, template: &Config) -> SearchResult {
        let mut run = SearchRun::new(template.clone());
        let budget = self.settings.max_trials;

        // Phase 1: exponential growth until the first failure.
        let mut batch_size = self.settings.min_batch_size.max(1);
        let mut last_good: Option<u32> = None;
        let mut first_bad: Option<u32> = None;

        while run.trials.len() < budget {
            if self.attempt(&mut run, template, batch_size).await {
                last_good = Some(batch_size);
                match batch_size.checked_mul(2) {
                    Some(next) => batch_size = next,
                    None => {
                        debug!(batch_size, "batch size cannot grow further");
                        break;
                    }
                }
            } else {
                first_bad = Some(batch_size);
                break;
            }
        }

        let (lo, hi) = match (last_good, first_bad) {
            (None, _) => {
                info!(
                    precision = %template.precision,
                    "no stable baseline for template, first trial failed"
                );
                return run.finish(None);
            }
            // budget ran out (or growth saturated) before anything failed
            (Some(_), None) => return run.finish(None),
            (Some(lo), Some(hi)) => (lo, hi),
        };

        // Phase 2: bisect [last_good, first_bad].
        let mut bracket = Bracket { lo, hi };
        debug!(lo, hi, "entering binary search");
        while run.trials.len() < budget && bracket.width() > 1 {
            let mid = bracket.lo + (bracket.hi - bracket.lo) / 2;
            if self.attempt(&mut run, template, mid).await {
                bracket.lo = mid;
            } else {
                bracket.hi = mid;
            }
            debug!(lo = bracket.lo, hi = bracket.hi, "bracket updated");
        }

        run.finish(Some(bracket))
    }

    async fn attempt(&mut self, run: &mut SearchRun, template: &Config, batch_size: u32) -> bool {
        let record = self.run_trial(template, batch_size).await;
        let ok = record.ok;
        run.push(record);
        ok
    }

    async fn run_trial(&mut self, template: &Config, batch_size: u32) -> TrialRecord {
        self.trials_run += 1;
        let index = self.trials_run;
        let config = template.with_batch_size(batch_size);
        info!(
            trial = index,
            batch_size,
            precision = %config.precision,
            "running trial"
        );

        let outcome = self
            .executor
            .execute(
                &self.command,
                &config.env_overlay(),
                self.context.timeout,
                &self.context.exec_cwd,
            )
            .await;
        let mut record = classify(index, config, outcome, &self.context.metric_name);

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(&mut record) {
                warn!(trial = index, "failed to record trial artifacts: {}", e);
            }
        }

        info!(
            trial = index,
            batch_size,
            status = record.status_label(),
            metric = ?record.metric_value,
            duration_s = record.outcome.duration_s,
            "trial finished"
        );
        record
    }
}

/// Per-invocation state: the trial log and the running best.
struct SearchRun {
    template: Config,
    trials: Vec<TrialRecord>,
    best_index: Option<usize>,
}

impl SearchRun {
    fn new(template: Config) -> Self {
        Self {
            template,
            trials: Vec::new(),
            best_index: None,
        }
    }

    fn push(&mut self, record: TrialRecord) {
        if let (true, Some(value)) = (record.ok, record.metric_value) {
            // strict comparison keeps the earliest trial on ties
            let better = match self.best_index.and_then(|i| self.trials[i].metric_value) {
                None => true,
                Some(best) => value > best,
            };
            if better {
                self.best_index = Some(self.trials.len());
            }
        }
        self.trials.push(record);
    }

    fn finish(self, bracket: Option<Bracket>) -> SearchResult {
        SearchResult {
            template: self.template,
            trials: self.trials,
            best_index: self.best_index,
            bracket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use av_types::{FailureKind, Precision, TrialOutcome, ENV_BATCH_SIZE, ENV_PRECISION};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Copy, Debug)]
    enum Reply {
        Ok(f64),
        Oom,
        Timeout,
        Crash,
        NoMetric,
        SpawnError,
    }

    /// Answers each trial from a function of the batch size.
    struct ScriptedExecutor {
        script: Box<dyn Fn(u32) -> Reply + Send + Sync>,
        calls: Arc<Mutex<Vec<u32>>>,
    }

    impl ScriptedExecutor {
        fn new(script: impl Fn(u32) -> Reply + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// ok with metric `10 * bs` below `limit`, OOM from `limit` up.
        fn oom_at(limit: u32) -> Self {
            Self::new(move |bs| {
                if bs >= limit {
                    Reply::Oom
                } else {
                    Reply::Ok(10.0 * f64::from(bs))
                }
            })
        }
    }

    #[async_trait]
    impl TrialExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _command: &str,
            env: &BTreeMap<String, String>,
            _timeout: Duration,
            _cwd: &Path,
        ) -> TrialOutcome {
            let bs: u32 = env[ENV_BATCH_SIZE].parse().unwrap();
            self.calls.lock().push(bs);
            let d = Duration::from_millis(10);
            match (self.script)(bs) {
                Reply::Ok(metric) => TrialOutcome::new(
                    Some(0),
                    false,
                    false,
                    format!("AUTOVRAM_METRIC it_per_s={metric}\n"),
                    String::new(),
                    d,
                ),
                Reply::Oom => TrialOutcome::new(
                    Some(1),
                    false,
                    true,
                    String::new(),
                    "CUDA out of memory".into(),
                    d,
                ),
                Reply::Timeout => {
                    TrialOutcome::new(None, true, false, String::new(), String::new(), d)
                }
                Reply::Crash => {
                    TrialOutcome::new(Some(139), false, false, String::new(), String::new(), d)
                }
                Reply::NoMetric => {
                    TrialOutcome::new(Some(0), false, false, "done\n".into(), String::new(), d)
                }
                Reply::SpawnError => TrialOutcome::spawn_failed("no such file", d),
            }
        }
    }

    fn context() -> SessionContext {
        SessionContext::script(
            "it_per_s",
            Duration::from_secs(1),
            "/tmp/av-test",
            "/tmp",
            "heuristic",
        )
    }

    fn controller(executor: ScriptedExecutor, max_trials: usize) -> SearchController<ScriptedExecutor> {
        SearchController::new(
            executor,
            context(),
            "python train.py",
            SearchSettings {
                min_batch_size: 1,
                max_trials,
            },
        )
    }

    fn sizes(result: &SearchResult) -> Vec<u32> {
        result.trials.iter().map(|t| t.batch_size()).collect()
    }

    #[tokio::test]
    async fn binary_search_converges_below_oom() {
        let mut ctl = controller(ScriptedExecutor::oom_at(4), 10);
        let result = ctl.search(&Config::template()).await;

        assert_eq!(sizes(&result), vec![1, 2, 4, 3]);
        assert_eq!(result.best_config().map(|c| c.batch_size), Some(3));
        assert!(result.trials.iter().any(|t| t.oom()));
        assert_eq!(result.bracket, Some(Bracket { lo: 3, hi: 4 }));
    }

    #[tokio::test]
    async fn first_trial_failure_means_no_result() {
        let mut ctl = controller(ScriptedExecutor::oom_at(1), 5);
        let result = ctl.search(&Config::template()).await;

        assert!(result.best().is_none());
        assert_eq!(result.trials.len(), 1);
        assert_eq!(result.bracket, None);
    }

    #[tokio::test]
    async fn growth_then_bisection_scenario() {
        // 1,2,4,8 ok; 16 OOMs; throughput peaks at 4 and then falls off
        let exec = ScriptedExecutor::new(|bs| match bs {
            b if b >= 13 => Reply::Oom,
            4 => Reply::Ok(100.0),
            b => Reply::Ok(f64::from(b)),
        });
        let mut ctl = controller(exec, 25);
        let result = ctl.search(&Config::template()).await;

        // 12 passes, 14 and 13 fail
        assert_eq!(sizes(&result), vec![1, 2, 4, 8, 16, 12, 14, 13]);
        assert_eq!(result.bracket, Some(Bracket { lo: 12, hi: 13 }));
        // the best trial comes from phase 1, not the bracket edge
        assert_eq!(result.best_config().map(|c| c.batch_size), Some(4));
    }

    #[tokio::test]
    async fn phase_two_midpoint_depends_on_outcome() {
        let exec = ScriptedExecutor::new(|bs| if bs >= 11 { Reply::Oom } else { Reply::Ok(1.0) });
        let mut ctl = controller(exec, 25);
        let result = ctl.search(&Config::template()).await;
        // 12 fails so the next midpoint is 10
        assert_eq!(sizes(&result), vec![1, 2, 4, 8, 16, 12, 10, 11]);
        assert_eq!(result.bracket, Some(Bracket { lo: 10, hi: 11 }));
    }

    #[tokio::test]
    async fn timeout_halts_growth_like_any_failure() {
        let exec = ScriptedExecutor::new(|bs| if bs >= 4 { Reply::Timeout } else { Reply::Ok(5.0) });
        let mut ctl = controller(exec, 25);
        let result = ctl.search(&Config::template()).await;

        assert_eq!(sizes(&result), vec![1, 2, 4, 3]);
        assert_eq!(result.trials[2].failure(), Some(FailureKind::TimedOut));
        assert_eq!(result.bracket, Some(Bracket { lo: 3, hi: 4 }));
    }

    #[tokio::test]
    async fn missing_metric_counts_as_failure() {
        let exec = ScriptedExecutor::new(|bs| if bs >= 2 { Reply::NoMetric } else { Reply::Ok(5.0) });
        let mut ctl = controller(exec, 25);
        let result = ctl.search(&Config::template()).await;

        assert_eq!(sizes(&result), vec![1, 2]);
        assert_eq!(result.trials[1].failure(), Some(FailureKind::MetricMissing));
        assert_eq!(result.best_config().map(|c| c.batch_size), Some(1));
    }

    #[tokio::test]
    async fn spawn_and_crash_failures_do_not_abort() {
        let mut ctl = controller(ScriptedExecutor::new(|_| Reply::SpawnError), 5);
        let result = ctl.search(&Config::template()).await;
        assert!(result.best().is_none());
        assert_eq!(result.trials[0].failure(), Some(FailureKind::SpawnFailed));

        let exec = ScriptedExecutor::new(|bs| if bs >= 8 { Reply::Crash } else { Reply::Ok(1.0) });
        let mut ctl = controller(exec, 25);
        let result = ctl.search(&Config::template()).await;
        assert_eq!(result.trials[3].failure(), Some(FailureKind::ExitCode(139)));
        assert_eq!(result.bracket, Some(Bracket { lo: 7, hi: 8 }));
    }

    #[tokio::test]
    async fn budget_exhausted_while_growing() {
        let mut ctl = controller(ScriptedExecutor::oom_at(1000), 6);
        let result = ctl.search(&Config::template()).await;

        assert_eq!(sizes(&result), vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(result.bracket, None);
        assert_eq!(result.best_config().map(|c| c.batch_size), Some(32));
    }

    #[tokio::test]
    async fn budget_exhausted_mid_binary_search() {
        let mut ctl = controller(ScriptedExecutor::oom_at(13), 6);
        let result = ctl.search(&Config::template()).await;

        assert_eq!(sizes(&result), vec![1, 2, 4, 8, 16, 12]);
        assert_eq!(result.bracket, Some(Bracket { lo: 12, hi: 16 }));
        assert_eq!(result.best_config().map(|c| c.batch_size), Some(12));
    }

    #[tokio::test]
    async fn zero_budget_runs_nothing() {
        let exec = ScriptedExecutor::oom_at(100);
        let calls = exec.calls.clone();
        let mut ctl = controller(exec, 0);
        let result = ctl.search(&Config::template()).await;
        assert!(result.trials.is_empty());
        assert!(result.best().is_none());
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn ties_keep_the_first_trial() {
        let exec = ScriptedExecutor::new(|bs| if bs >= 8 { Reply::Oom } else { Reply::Ok(5.0) });
        let mut ctl = controller(exec, 25);
        let result = ctl.search(&Config::template()).await;
        assert_eq!(result.best_index, Some(0));
        assert_eq!(result.best_config().map(|c| c.batch_size), Some(1));
    }

    #[tokio::test]
    async fn min_batch_size_sets_the_starting_point() {
        let mut settings = SearchSettings {
            min_batch_size: 3,
            max_trials: 25,
        };
        let exec = ScriptedExecutor::oom_at(20);
        let mut ctl = SearchController::new(exec, context(), "cmd", settings);
        let result = ctl.search(&Config::template()).await;
        assert_eq!(&sizes(&result)[..4], &[3, 6, 12, 24]);

        settings.min_batch_size = 0;
        let mut ctl = SearchController::new(ScriptedExecutor::oom_at(20), context(), "cmd", settings);
        let result = ctl.search(&Config::template()).await;
        assert_eq!(result.trials[0].batch_size(), 1);
    }

    #[tokio::test]
    async fn trial_indices_continue_across_templates() {
        let mut ctl = controller(ScriptedExecutor::oom_at(4), 10);
        let first = ctl.search(&Config::template()).await;
        let second = ctl
            .search(&Config::template().with_precision(Precision::Bf16))
            .await;

        let first_idx: Vec<usize> = first.trials.iter().map(|t| t.index).collect();
        let second_idx: Vec<usize> = second.trials.iter().map(|t| t.index).collect();
        assert_eq!(first_idx, vec![1, 2, 3, 4]);
        assert_eq!(second_idx, vec![5, 6, 7, 8]);
        assert_eq!(ctl.trials_run(), 8);
        assert!(second.trials.iter().all(|t| t.config.precision == Precision::Bf16));
    }

    #[tokio::test]
    async fn trial_env_carries_template_knobs() {
        struct EnvCheck;

        #[async_trait]
        impl TrialExecutor for EnvCheck {
            async fn execute(
                &self,
                _command: &str,
                env: &BTreeMap<String, String>,
                _timeout: Duration,
                _cwd: &Path,
            ) -> TrialOutcome {
                let ok = env[ENV_PRECISION] == "fp32";
                let stdout = if ok { "AUTOVRAM_METRIC it_per_s=1\n" } else { "" };
                TrialOutcome::new(Some(0), false, false, stdout.into(), String::new(), Duration::ZERO)
            }
        }

        let mut ctl = SearchController::new(EnvCheck, context(), "cmd", SearchSettings { min_batch_size: 1, max_trials: 3 });
        let result = ctl
            .search(&Config::template().with_precision(Precision::Fp32))
            .await;
        assert!(result.trials.iter().all(|t| t.ok));
    }

    #[tokio::test]
    async fn invariants_hold_across_boundaries_and_budgets() {
        for limit in 1..=70u32 {
            for max_trials in 0..=12usize {
                let mut ctl = controller(ScriptedExecutor::oom_at(limit), max_trials);
                let result = ctl.search(&Config::template()).await;

                assert!(result.trials.len() <= max_trials);

                if let Some(best) = result.best() {
                    assert!(best.ok);
                    let top = result
                        .ok_trials()
                        .filter_map(|t| t.metric_value)
                        .fold(f64::MIN, f64::max);
                    assert_eq!(best.metric_value, Some(top));
                }

                if limit == 1 && max_trials > 0 {
                    assert_eq!(result.trials.len(), 1);
                    assert!(result.best().is_none());
                }

                // replay the bracket: every phase-2 midpoint lies strictly inside it
                // and the width never grows
                let grow_len = result
                    .trials
                    .iter()
                    .position(|t| !t.ok)
                    .map(|i| i + 1)
                    .unwrap_or(result.trials.len());
                if grow_len < result.trials.len() || result.bracket.is_some() {
                    let mut lo = result.trials[grow_len - 2].batch_size();
                    let mut hi = result.trials[grow_len - 1].batch_size();
                    let mut width = hi - lo;
                    for t in &result.trials[grow_len..] {
                        let bs = t.batch_size();
                        assert!(lo < bs && bs < hi);
                        if t.ok {
                            lo = bs;
                        } else {
                            hi = bs;
                        }
                        assert!(hi - lo <= width);
                        width = hi - lo;
                    }
                    assert_eq!(result.bracket, Some(Bracket { lo, hi }));
                    if result.trials.len() < max_trials {
                        assert_eq!(width, 1);
                    }
                }
            }
        }
    }
}
