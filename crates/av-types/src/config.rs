//! Tuning knobs handed to the target process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{AvError, AvResult};

pub const ENV_BATCH_SIZE: &str = "AUTOVRAM_BATCH_SIZE";
pub const ENV_MICRO_BATCH: &str = "AUTOVRAM_MICRO_BATCH";
pub const ENV_GRAD_ACCUM: &str = "AUTOVRAM_GRAD_ACCUM";
pub const ENV_PRECISION: &str = "AUTOVRAM_PRECISION";
pub const ENV_SEQ_LEN: &str = "AUTOVRAM_SEQ_LEN";

/// Numeric precision the target process should train or serve with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    Fp16,
    Bf16,
}

impl Precision {
    pub const ALL: [Precision; 3] = [Precision::Fp16, Precision::Bf16, Precision::Fp32];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fp32 => "fp32",
            Self::Fp16 => "fp16",
            Self::Bf16 => "bf16",
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::Fp16
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fp32" => Ok(Self::Fp32),
            "fp16" => Ok(Self::Fp16),
            "bf16" => Ok(Self::Bf16),
            other => Err(crate::validation_error!(
                "unknown precision '{other}', expected fp32|fp16|bf16"
            )),
        }
    }
}

/// Knobs used by the inference-serving candidate family. Never exported to the
/// child through the environment overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServingKnobs {
    pub dtype: Option<String>,
    pub gpu_memory_utilization: Option<f64>,
    pub max_num_batched_tokens: Option<u64>,
    pub max_num_seqs: Option<u32>,
    pub quantization: Option<String>,
}

/// One point in the configuration space.
///
/// Values are treated as immutable: per-trial variants are derived with
/// [`Config::with_batch_size`] rather than mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub batch_size: u32,
    pub micro_batch: Option<u32>,
    pub grad_accum: u32,
    pub precision: Precision,
    pub seq_len: Option<u32>,
    #[serde(flatten)]
    pub serving: ServingKnobs,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 1,
            micro_batch: None,
            grad_accum: 1,
            precision: Precision::default(),
            seq_len: None,
            serving: ServingKnobs::default(),
        }
    }
}

impl Config {
    /// Template with batch size and micro batch pinned to 1.
    pub fn template() -> Self {
        Self {
            micro_batch: Some(1),
            ..Self::default()
        }
    }

    /// Derive a copy with both batch size and micro batch set to `batch_size`.
    pub fn with_batch_size(&self, batch_size: u32) -> Self {
        Self {
            batch_size,
            micro_batch: Some(batch_size),
            ..self.clone()
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_grad_accum(mut self, grad_accum: u32) -> Self {
        self.grad_accum = grad_accum;
        self
    }

    pub fn with_seq_len(mut self, seq_len: Option<u32>) -> Self {
        self.seq_len = seq_len;
        self
    }

    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.serving.dtype = Some(dtype.into());
        self
    }

    pub fn effective_micro_batch(&self) -> u32 {
        self.micro_batch.unwrap_or(self.batch_size)
    }

    pub fn validate(&self) -> AvResult<()> {
        if self.batch_size < 1 {
            return Err(crate::validation_error!(
                "batch_size must be >= 1, got {}",
                self.batch_size
            ));
        }
        if self.grad_accum < 1 {
            return Err(crate::validation_error!(
                "grad_accum must be >= 1, got {}",
                self.grad_accum
            ));
        }
        if let Some(util) = self.serving.gpu_memory_utilization {
            if !(0.0..=1.0).contains(&util) {
                return Err(crate::validation_error!(
                    "gpu_memory_utilization must be within [0, 1], got {util}"
                ));
            }
        }
        Ok(())
    }

    /// Environment variables handed to the child for this config.
    pub fn env_overlay(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(ENV_BATCH_SIZE.to_string(), self.batch_size.to_string());
        env.insert(
            ENV_MICRO_BATCH.to_string(),
            self.effective_micro_batch().to_string(),
        );
        env.insert(ENV_GRAD_ACCUM.to_string(), self.grad_accum.to_string());
        env.insert(ENV_PRECISION.to_string(), self.precision.to_string());
        if let Some(seq_len) = self.seq_len {
            env.insert(ENV_SEQ_LEN.to_string(), seq_len.to_string());
        }
        env
    }
}
