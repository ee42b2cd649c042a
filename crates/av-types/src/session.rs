use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How the target process is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// A training/inference script reading the `AUTOVRAM_*` overlay.
    Script,
    /// An inference-serving process tuned through serving knobs.
    Serving,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => f.write_str("script"),
            Self::Serving => f.write_str("serving"),
        }
    }
}

/// Immutable description of one tuning session, created once at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub mode: ExecutionMode,
    /// Metric name searched for in the child's sentinel lines.
    pub metric_name: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Session directory that receives trial artifacts.
    pub work_dir: PathBuf,
    /// Working directory the child is started in.
    pub exec_cwd: PathBuf,
    /// Name of the active candidate source.
    pub source_name: String,
}

impl SessionContext {
    pub fn script(
        metric_name: impl Into<String>,
        timeout: Duration,
        work_dir: impl Into<PathBuf>,
        exec_cwd: impl Into<PathBuf>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            mode: ExecutionMode::Script,
            metric_name: metric_name.into(),
            timeout,
            work_dir: work_dir.into(),
            exec_cwd: exec_cwd.into(),
            source_name: source_name.into(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
