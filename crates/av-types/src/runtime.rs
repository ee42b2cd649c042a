//! Helpers for target processes.
//!
//! A process being tuned reads its knobs back from the `AUTOVRAM_*` overlay
//! with [`RuntimeConfig::from_env`] and reports throughput with
//! [`print_metric`].

use serde::{Deserialize, Serialize};

use crate::config::{
    Precision, ENV_BATCH_SIZE, ENV_GRAD_ACCUM, ENV_MICRO_BATCH, ENV_PRECISION, ENV_SEQ_LEN,
};

/// Prefix of a metric sentinel line.
pub const METRIC_MARKER: &str = "AUTOVRAM_METRIC";

/// Knobs as seen from inside the target process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub batch_size: u32,
    pub micro_batch: u32,
    pub grad_accum: u32,
    pub precision: Precision,
    pub seq_len: Option<u32>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparsable values fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let int = |key: &str| lookup(key).and_then(|raw| raw.trim().parse::<u32>().ok());

        let batch_size = int(ENV_BATCH_SIZE).unwrap_or(1);
        let micro_batch = int(ENV_MICRO_BATCH).unwrap_or(batch_size);
        let grad_accum = int(ENV_GRAD_ACCUM).unwrap_or(1);
        let precision = lookup(ENV_PRECISION)
            .and_then(|raw| raw.parse::<Precision>().ok())
            .unwrap_or_default();
        let seq_len = int(ENV_SEQ_LEN);

        Self {
            batch_size,
            micro_batch,
            grad_accum,
            precision,
            seq_len,
        }
    }
}

pub fn format_metric(name: &str, value: f64) -> String {
    format!("{METRIC_MARKER} {name}={value:?}")
}

/// Print a metric sentinel line on stdout.
pub fn print_metric(name: &str, value: f64) {
    println!("{}", format_metric(name, value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = RuntimeConfig::from_lookup(|_| None);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.micro_batch, 1);
        assert_eq!(cfg.grad_accum, 1);
        assert_eq!(cfg.precision, Precision::Fp16);
        assert_eq!(cfg.seq_len, None);
    }

    #[test]
    fn micro_batch_follows_batch_size() {
        let cfg = RuntimeConfig::from_lookup(lookup_from(&[(ENV_BATCH_SIZE, "8")]));
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.micro_batch, 8);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = RuntimeConfig::from_lookup(lookup_from(&[
            (ENV_BATCH_SIZE, "lots"),
            (ENV_PRECISION, "int4"),
            (ENV_SEQ_LEN, "x"),
            (ENV_GRAD_ACCUM, "4"),
        ]));
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.precision, Precision::Fp16);
        assert_eq!(cfg.seq_len, None);
        assert_eq!(cfg.grad_accum, 4);
    }

    #[test]
    fn metric_line_format() {
        assert_eq!(format_metric("it_per_s", 12.5), "AUTOVRAM_METRIC it_per_s=12.5");
        assert_eq!(format_metric("tok_s", 3.0), "AUTOVRAM_METRIC tok_s=3.0");
    }
}
