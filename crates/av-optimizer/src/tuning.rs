//! Tuning session configuration and cross-template run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use av_runner::{TrialExecutor, DEFAULT_GRACE_PERIOD};
use av_types::{AvResult, CandidateSourceError, Config, SearchResult, SessionContext, TrialRecord};

use crate::candidates::CandidateSource;
use crate::search::{SearchController, SearchSettings};

/// Unique tuning run identifier.
pub type TuningId = Uuid;

/// Top-level configuration for a tuning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    pub id: TuningId,

    /// Command line of the target process, split with shell word rules.
    pub command: String,

    /// Metric name read from `AUTOVRAM_METRIC` lines.
    pub objective_metric: String,

    /// Wall-clock limit per trial.
    pub timeout: Duration,

    /// Time between SIGTERM and SIGKILL once a trial times out.
    pub grace_period: Duration,

    /// Trial budget per candidate template.
    pub max_trials: usize,

    pub min_batch_size: u32,

    /// Candidate source name, resolved through the registry.
    pub source: String,

    pub created_at: DateTime<Utc>,
}

impl TuningConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            objective_metric: "it_per_s".to_string(),
            timeout: Duration::from_secs(60),
            grace_period: DEFAULT_GRACE_PERIOD,
            max_trials: 25,
            min_batch_size: 1,
            source: "heuristic".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_objective(mut self, metric: &str) -> Self {
        self.objective_metric = metric.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-trial timeout from a user-supplied number of seconds,
    /// rejecting values that are not positive or do not fit a `Duration`.
    pub fn with_timeout_secs(self, secs: f64) -> AvResult<Self> {
        match Duration::try_from_secs_f64(secs) {
            Ok(timeout) if !timeout.is_zero() => Ok(self.with_timeout(timeout)),
            _ => Err(av_types::config_error!(
                "timeout must be a positive number of seconds, got {secs}"
            )),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_min_batch_size(mut self, n: u32) -> Self {
        self.min_batch_size = n;
        self
    }

    pub fn with_source(mut self, name: &str) -> Self {
        self.source = name.to_string();
        self
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            min_batch_size: self.min_batch_size,
            max_trials: self.max_trials,
        }
    }

    /// Session context for a script-mode run. Serving sources switch the
    /// mode with [`SessionContext::with_mode`].
    pub fn session_context(
        &self,
        work_dir: impl Into<PathBuf>,
        exec_cwd: impl Into<PathBuf>,
        source_name: &str,
    ) -> SessionContext {
        SessionContext::script(
            self.objective_metric.clone(),
            self.timeout,
            work_dir,
            exec_cwd,
            source_name,
        )
    }
}

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// The winning config across all templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestConfig {
    pub config: Config,
    pub score: f64,
    pub trial_index: usize,
}

/// One line of the compact trial listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub index: usize,
    pub batch_size: u32,
    pub precision: String,
    pub dtype: Option<String>,
    pub status: String,
    pub metric_value: Option<f64>,
    pub duration_s: f64,
}

impl From<&TrialRecord> for TrialSummary {
    fn from(record: &TrialRecord) -> Self {
        Self {
            index: record.index,
            batch_size: record.batch_size(),
            precision: record.config.precision.to_string(),
            dtype: record.config.serving.dtype.clone(),
            status: record.status_label().to_string(),
            metric_value: record.metric_value,
            duration_s: record.outcome.duration_s,
        }
    }
}

/// Aggregate result of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub id: TuningId,
    pub source: String,
    pub metric_name: String,
    pub state: TuningState,
    pub results: Vec<SearchResult>,
    pub best: Option<BestConfig>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TuningReport {
    pub fn new(source: &str, metric_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.to_string(),
            metric_name: metric_name.to_string(),
            state: TuningState::Pending,
            results: Vec::new(),
            best: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = TuningState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = TuningState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = TuningState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Replace the best config if `score` strictly beats it; the first
    /// config with a given score is kept.
    pub fn update_best(&mut self, record: &TrialRecord, score: f64) {
        let improves = match &self.best {
            None => true,
            Some(current) => score > current.score,
        };
        if improves {
            self.best = Some(BestConfig {
                config: record.config.clone(),
                score,
                trial_index: record.index,
            });
        }
    }

    pub fn best_config(&self) -> Option<&Config> {
        self.best.as_ref().map(|b| &b.config)
    }

    pub fn trials(&self) -> impl Iterator<Item = &TrialRecord> {
        self.results.iter().flat_map(|r| r.trials.iter())
    }

    pub fn trials_total(&self) -> usize {
        self.results.iter().map(|r| r.trials.len()).sum()
    }

    pub fn trials_ok(&self) -> usize {
        self.trials().filter(|t| t.ok).count()
    }

    pub fn summaries(&self) -> Vec<TrialSummary> {
        self.trials().map(TrialSummary::from).collect()
    }
}

/// Called with each template's result as soon as its search finishes.
pub type TemplateCallback<'a> = Box<dyn FnMut(&SearchResult) + Send + 'a>;

/// Runs every template a source proposes through one controller.
pub struct TuningRun<'a, E: TrialExecutor> {
    source: &'a dyn CandidateSource,
    controller: &'a mut SearchController<E>,
    on_template: Option<TemplateCallback<'a>>,
}

impl<'a, E: TrialExecutor> TuningRun<'a, E> {
    pub fn new(source: &'a dyn CandidateSource, controller: &'a mut SearchController<E>) -> Self {
        Self {
            source,
            controller,
            on_template: None,
        }
    }

    pub fn on_template(mut self, callback: impl FnMut(&SearchResult) + Send + 'a) -> Self {
        self.on_template = Some(Box::new(callback));
        self
    }

    /// Search each proposed template in order and pick the best ok trial by
    /// the source's score.
    ///
    /// An empty proposal is an error; the failed report is still written to
    /// `report.json`. A run in which no trial was ok still completes, with
    /// `best` left empty.
    pub async fn run(mut self) -> AvResult<TuningReport> {
        let context = self.controller.context().clone();
        let mut report = TuningReport::new(self.source.name(), &context.metric_name);

        if let Some(recorder) = self.controller.recorder() {
            if let Err(e) = recorder.write_json("session.json", &context) {
                warn!("failed to write session summary: {}", e);
            }
        }

        let templates = self.source.propose(&context).await;
        if templates.is_empty() {
            let err = CandidateSourceError::NoCandidates {
                source_name: self.source.name().to_string(),
            };
            report.mark_failed(err.to_string());
            warn!(source = self.source.name(), "tuning failed: {}", err);
            self.save_report(&report);
            return Err(err.into());
        }

        report.mark_running();
        info!(
            source = self.source.name(),
            templates = templates.len(),
            metric = %context.metric_name,
            "starting tuning run"
        );

        for template in &templates {
            let result = self.controller.search(template).await;
            for record in result.ok_trials() {
                report.update_best(record, self.source.score(record));
            }
            info!(
                precision = %template.precision,
                trials = result.trials.len(),
                best = ?result.best_config().map(|c| c.batch_size),
                "template searched"
            );
            if let Some(callback) = self.on_template.as_mut() {
                callback(&result);
            }
            report.results.push(result);
        }

        report.mark_completed();
        match &report.best {
            Some(best) => info!(
                batch_size = best.config.batch_size,
                precision = %best.config.precision,
                score = best.score,
                "tuning finished"
            ),
            None => warn!("tuning finished without a stable configuration"),
        }

        self.save_report(&report);
        Ok(report)
    }

    fn save_report(&self, report: &TuningReport) {
        if let Some(recorder) = self.controller.recorder() {
            if let Err(e) = recorder.write_json("report.json", report) {
                warn!("failed to write tuning report: {}", e);
            }
        }
    }
}
