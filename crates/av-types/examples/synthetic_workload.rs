//! A stand-in training script for trying `autovram tune` without a GPU.
//!
//! It reads its knobs from the environment overlay, pretends to run a few
//! steps, and fails with an OOM-style message once the batch size exceeds
//! `SYNTHETIC_MEMORY_LIMIT` (default 24).
//!
//! ```text
//! cargo build --example synthetic_workload -p av-types
//! autovram tune --cmd "target/debug/examples/synthetic_workload"
//! ```

use av_types::*;
use std::time::{Duration, Instant};

fn main() {
    let cfg = RuntimeConfig::from_env();
    let limit: u32 = std::env::var("SYNTHETIC_MEMORY_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24);

    let bytes_per_sample = match cfg.precision {
        Precision::Fp32 => 2,
        Precision::Fp16 | Precision::Bf16 => 1,
    };
    let needed = cfg.micro_batch.saturating_mul(bytes_per_sample);
    if needed > limit {
        eprintln!(
            "RuntimeError: CUDA out of memory. Tried to allocate {} MiB",
            u64::from(needed) * 512
        );
        std::process::exit(1);
    }

    let steps = 20;
    let start = Instant::now();
    for _ in 0..steps {
        // Work grows sub-linearly with batch size, like a real accelerator.
        let step_ms = 2 + f64::from(cfg.micro_batch).sqrt() as u64;
        std::thread::sleep(Duration::from_millis(step_ms));
    }
    let elapsed = start.elapsed().as_secs_f64().max(1e-9);

    let samples = f64::from(steps) * f64::from(cfg.batch_size) * f64::from(cfg.grad_accum);
    print_metric("it_per_s", f64::from(steps) / elapsed);
    print_metric("samples_per_s", samples / elapsed);
}
