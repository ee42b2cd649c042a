//! Candidate sources: where the templates searched by a session come from.

use async_trait::async_trait;
use av_runner::find_executable;
use av_types::{
    AvResult, CandidateSourceError, Config, ExecutionMode, Precision, SessionContext,
    TrialRecord,
};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Proposes the templates a session searches, and optionally re-scores the
/// trials they produce.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &str;

    /// How the target process is driven for this source's templates.
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Script
    }

    /// Ordered, finite list of templates. The batch size of each template is
    /// ignored by the search, which always starts from its own minimum.
    async fn propose(&self, context: &SessionContext) -> Vec<Config>;

    /// Score used to rank ok trials across templates.
    fn score(&self, record: &TrialRecord) -> f64 {
        record.metric_value.unwrap_or(0.0)
    }
}

/// Dependency-free source: one template per precision.
#[derive(Debug, Clone)]
pub struct HeuristicSource {
    precisions: Vec<Precision>,
}

impl Default for HeuristicSource {
    fn default() -> Self {
        Self {
            precisions: Precision::ALL.to_vec(),
        }
    }
}

impl HeuristicSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_precisions(precisions: Vec<Precision>) -> Self {
        Self { precisions }
    }
}

#[async_trait]
impl CandidateSource for HeuristicSource {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn propose(&self, _context: &SessionContext) -> Vec<Config> {
        self.precisions
            .iter()
            .map(|&p| Config::template().with_precision(p))
            .collect()
    }
}

/// Inference-serving source: one template per model dtype.
#[derive(Debug, Clone, Default)]
pub struct ServingSource;

impl ServingSource {
    pub const DTYPES: [&'static str; 3] = ["float16", "bfloat16", "float32"];

    /// Conservative config for a serving engine when no benchmark loop is run.
    pub fn starter_config(max_model_len: u64) -> Config {
        let mut config = Config::default().with_dtype("float16");
        config.serving.gpu_memory_utilization = Some(0.90);
        config.serving.max_num_seqs = Some(16);
        config.serving.max_num_batched_tokens = Some(max_model_len.saturating_mul(16));
        config
    }
}

#[async_trait]
impl CandidateSource for ServingSource {
    fn name(&self) -> &str {
        "vllm"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Serving
    }

    async fn propose(&self, _context: &SessionContext) -> Vec<Config> {
        Self::DTYPES
            .iter()
            .map(|dtype| Config::template().with_dtype(*dtype))
            .collect()
    }
}

/// Source backed by an external `llm-autobatch` proposer.
///
/// `<program> propose` is expected to print batch sizes separated by
/// whitespace or commas. Anything unusable, including a proposer that does
/// not answer within the timeout, falls back to 1, 2, 4, 8.
#[derive(Debug, Clone)]
pub struct ExternalAutobatchSource {
    program: PathBuf,
    timeout: Duration,
}

impl ExternalAutobatchSource {
    pub const PROGRAM: &'static str = "llm-autobatch";
    pub const FALLBACK_BATCH_SIZES: [u32; 4] = [1, 2, 4, 8];
    pub const PROPOSER_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> AvResult<Self> {
        Self::with_program(Self::PROGRAM)
    }

    /// Resolve `program` on PATH (or as a path), failing with install
    /// guidance when it is missing.
    pub fn with_program(program: &str) -> AvResult<Self> {
        match find_executable(program) {
            Some(program) => Ok(Self {
                program,
                timeout: Self::PROPOSER_TIMEOUT,
            }),
            None => Err(CandidateSourceError::MissingDependency {
                source_name: Self::PROGRAM.to_string(),
                remediation: format!(
                    "Install it with `pip install llm-autobatch` and make sure `{}` is on PATH.",
                    program
                ),
            }
            .into()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    async fn proposed_batch_sizes(&self) -> Vec<u32> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("propose")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                warn!(status = %output.status, "llm-autobatch proposer failed");
                return Vec::new();
            }
            Ok(Err(e)) => {
                warn!("failed to run llm-autobatch proposer: {}", e);
                return Vec::new();
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "llm-autobatch proposer timed out");
                return Vec::new();
            }
        };
        parse_batch_sizes(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl CandidateSource for ExternalAutobatchSource {
    fn name(&self) -> &str {
        Self::PROGRAM
    }

    async fn propose(&self, _context: &SessionContext) -> Vec<Config> {
        let mut sizes = self.proposed_batch_sizes().await;
        if sizes.is_empty() {
            debug!("no usable proposals, using fallback batch sizes");
            sizes = Self::FALLBACK_BATCH_SIZES.to_vec();
        }
        let base = Config::template();
        sizes.into_iter().map(|bs| base.with_batch_size(bs)).collect()
    }
}

fn parse_batch_sizes(text: &str) -> Vec<u32> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|token| token.trim().parse::<u32>().ok())
        .filter(|&bs| bs > 0)
        .collect()
}

const SOURCE_NAMES: [&str; 4] = ["heuristic", "torch", "vllm", "llm-autobatch"];

/// Names accepted by [`resolve_source`]. `llm-autobatch` is listed only when
/// its proposer is installed.
pub fn available_sources() -> Vec<&'static str> {
    SOURCE_NAMES
        .iter()
        .copied()
        .filter(|&name| {
            name != ExternalAutobatchSource::PROGRAM
                || find_executable(ExternalAutobatchSource::PROGRAM).is_some()
        })
        .collect()
}

/// Resolve a candidate source by name (case-insensitive, trimmed).
pub fn resolve_source(name: &str) -> AvResult<Box<dyn CandidateSource>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "heuristic" | "torch" => Ok(Box::new(HeuristicSource::new())),
        "vllm" => Ok(Box::new(ServingSource)),
        "llm-autobatch" => Ok(Box::new(ExternalAutobatchSource::new()?)),
        _ => Err(CandidateSourceError::Unknown {
            name: name.to_string(),
            available: available_sources().join(", "),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_types::{AvError, TrialOutcome};
    use std::time::Duration;

    fn context() -> SessionContext {
        SessionContext::script("it_per_s", Duration::from_secs(5), "/tmp/run", "/tmp", "test")
    }

    #[tokio::test]
    async fn heuristic_proposes_each_precision_in_order() {
        let configs = HeuristicSource::new().propose(&context()).await;
        let precisions: Vec<Precision> = configs.iter().map(|c| c.precision).collect();
        assert_eq!(precisions, vec![Precision::Fp16, Precision::Bf16, Precision::Fp32]);
        assert!(configs.iter().all(|c| c.batch_size == 1 && c.micro_batch == Some(1)));
    }

    #[tokio::test]
    async fn heuristic_custom_precisions() {
        let source = HeuristicSource::with_precisions(vec![Precision::Bf16]);
        assert_eq!(source.propose(&context()).await.len(), 1);
        assert_eq!(source.mode(), ExecutionMode::Script);
    }

    #[tokio::test]
    async fn serving_proposes_dtypes() {
        assert_eq!(ServingSource.mode(), ExecutionMode::Serving);
        let dtypes: Vec<Option<String>> = ServingSource
            .propose(&context())
            .await
            .into_iter()
            .map(|c| c.serving.dtype)
            .collect();
        assert_eq!(
            dtypes,
            vec![
                Some("float16".to_string()),
                Some("bfloat16".to_string()),
                Some("float32".to_string())
            ]
        );
    }

    #[test]
    fn serving_starter_config() {
        let config = ServingSource::starter_config(4096);
        assert_eq!(config.serving.dtype.as_deref(), Some("float16"));
        assert_eq!(config.serving.gpu_memory_utilization, Some(0.90));
        assert_eq!(config.serving.max_num_seqs, Some(16));
        assert_eq!(config.serving.max_num_batched_tokens, Some(65536));
    }

    #[test]
    fn default_score_is_metric_or_zero() {
        let ok = TrialRecord::new(
            1,
            Config::template(),
            TrialOutcome::new(Some(0), false, false, String::new(), String::new(), Duration::ZERO),
            Some(7.5),
        );
        assert_eq!(HeuristicSource::new().score(&ok), 7.5);

        let missing = TrialRecord::new(
            2,
            Config::template(),
            TrialOutcome::new(Some(0), false, false, String::new(), String::new(), Duration::ZERO),
            None,
        );
        assert_eq!(ServingSource.score(&missing), 0.0);
    }

    #[test]
    fn registry_resolves_names_and_alias() {
        assert_eq!(resolve_source("heuristic").unwrap().name(), "heuristic");
        assert_eq!(resolve_source(" Torch ").unwrap().name(), "heuristic");
        assert_eq!(resolve_source("vllm").unwrap().name(), "vllm");
    }

    #[test]
    fn unknown_source_lists_available() {
        let err = resolve_source("tensorflow").err().unwrap();
        let text = err.to_string();
        assert!(text.contains("Unknown engine 'tensorflow'"));
        assert!(text.contains("heuristic, torch, vllm"));
    }

    #[test]
    fn missing_proposer_fails_fast_with_remediation() {
        let err = ExternalAutobatchSource::with_program("definitely-missing-autobatch").unwrap_err();
        match err {
            AvError::CandidateSource(CandidateSourceError::MissingDependency {
                source_name,
                remediation,
            }) => {
                assert_eq!(source_name, "llm-autobatch");
                assert!(remediation.contains("pip install"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn batch_size_parsing_skips_junk() {
        assert_eq!(parse_batch_sizes("1 2, 4\n16"), vec![1, 2, 4, 16]);
        assert_eq!(parse_batch_sizes("0 -3 abc 8"), vec![8]);
        assert!(parse_batch_sizes("").is_empty());
    }

    #[cfg(unix)]
    mod external {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn script(dir: &TempDir, body: &str) -> String {
            let path = dir.path().join("proposer");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_str().unwrap().to_string()
        }

        async fn batch_sizes(source: &ExternalAutobatchSource) -> Vec<u32> {
            source
                .propose(&context())
                .await
                .iter()
                .map(|c| c.batch_size)
                .collect()
        }

        #[tokio::test]
        async fn uses_proposed_batch_sizes() {
            let dir = TempDir::new().unwrap();
            let program = script(&dir, "echo '3 6 12'");
            let source = ExternalAutobatchSource::with_program(&program).unwrap();
            assert_eq!(batch_sizes(&source).await, vec![3, 6, 12]);
            assert_eq!(source.name(), "llm-autobatch");
        }

        #[tokio::test]
        async fn falls_back_when_proposer_is_unusable() {
            let dir = TempDir::new().unwrap();
            let program = script(&dir, "echo nothing useful");
            let source = ExternalAutobatchSource::with_program(&program).unwrap();
            assert_eq!(batch_sizes(&source).await, vec![1, 2, 4, 8]);

            let failing = script(&dir, "exit 3");
            let source = ExternalAutobatchSource::with_program(&failing).unwrap();
            assert_eq!(batch_sizes(&source).await, vec![1, 2, 4, 8]);
        }

        #[tokio::test]
        async fn hung_proposer_times_out_to_fallback() {
            let dir = TempDir::new().unwrap();
            let program = script(&dir, "exec sleep 30");
            let source = ExternalAutobatchSource::with_program(&program)
                .unwrap()
                .with_timeout(Duration::from_millis(300));

            let start = std::time::Instant::now();
            assert_eq!(batch_sizes(&source).await, vec![1, 2, 4, 8]);
            assert!(start.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn proposer_does_not_block_the_runtime() {
            let dir = TempDir::new().unwrap();
            let program = script(&dir, "sleep 1; echo 5");
            let source = ExternalAutobatchSource::with_program(&program).unwrap();

            let ticker = tokio::spawn(async {
                let mut ticks = 0u32;
                for _ in 0..5 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    ticks += 1;
                }
                ticks
            });
            assert_eq!(batch_sizes(&source).await, vec![5]);
            // current-thread runtime: the ticker only progresses if propose yields
            assert!(ticker.is_finished());
            assert_eq!(ticker.await.unwrap(), 5);
        }
    }
}
