//! Host and accelerator detection for `info`, `doctor` and `tune`.
//!
//! Everything here is best effort: a missing or failing vendor tool simply
//! means that accelerator is not reported.

use av_runner::find_executable;
use av_types::{Compute, SystemInfo};
use std::collections::BTreeMap;
use std::process::Command;
use tracing::debug;

/// Detect the host, preferring CUDA, then ROCm, then Apple Metal.
pub fn detect_system() -> SystemInfo {
    let mut info = SystemInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        compute: Compute::Cpu,
        gpu_name: None,
        vram_total_mib: None,
        extra: BTreeMap::new(),
    };

    if let Some(gpus) = run_tool(
        "nvidia-smi",
        &[
            "--query-gpu=name,memory.total,driver_version",
            "--format=csv,noheader,nounits",
        ],
    )
    .map(|out| parse_nvidia_smi(&out))
    .filter(|gpus| !gpus.is_empty())
    {
        let first = &gpus[0];
        info.compute = Compute::Cuda;
        info.gpu_name = Some(first.name.clone());
        info.vram_total_mib = first.memory_mib;
        if let Some(driver) = &first.driver {
            info.extra.insert("driver".to_string(), driver.clone());
        }
        if gpus.len() > 1 {
            info.extra.insert("gpu_count".to_string(), gpus.len().to_string());
        }
        return info;
    }

    if let Some(out) = run_tool("rocm-smi", &["--showproductname", "--showmeminfo", "vram"]) {
        let (name, vram) = parse_rocm_smi(&out);
        if name.is_some() || vram.is_some() {
            info.compute = Compute::Rocm;
            info.gpu_name = name;
            info.vram_total_mib = vram;
            return info;
        }
    }

    if info.os == "macos" && info.arch == "aarch64" {
        info.compute = Compute::Metal;
        info.gpu_name = run_tool("sysctl", &["-n", "machdep.cpu.brand_string"])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        // unified memory is shared with the GPU
        info.vram_total_mib = run_tool("sysctl", &["-n", "hw.memsize"])
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|bytes| bytes / (1024 * 1024));
        info.extra
            .insert("memory".to_string(), "unified".to_string());
    }

    info
}

/// Actionable notes for `doctor`. Empty means nothing to report.
pub fn doctor_notes(info: &SystemInfo) -> Vec<String> {
    let mut notes = Vec::new();

    if find_executable("python3").is_none() && find_executable("python").is_none() {
        notes.push(
            "No Python interpreter found on PATH. Script mode usually runs a Python training script."
                .to_string(),
        );
    }

    match info.compute {
        Compute::Cpu => notes.push(
            "No CUDA, ROCm or Metal GPU detected. Tuning will still run, but it may be slow and not GPU-representative."
                .to_string(),
        ),
        Compute::Metal => notes.push(
            "Apple Metal detected. Support is best-effort; OOM patterns and VRAM reporting may be limited."
                .to_string(),
        ),
        Compute::Rocm => notes.push(
            "ROCm detected (best-effort). autovram is primarily tested on CUDA; please report issues."
                .to_string(),
        ),
        Compute::Cuda => {}
    }

    notes
}

#[derive(Debug, Clone, PartialEq)]
pub struct NvidiaGpu {
    pub name: String,
    pub memory_mib: Option<u64>,
    pub driver: Option<String>,
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` rows of
/// `name, memory.total[, driver_version]`.
pub fn parse_nvidia_smi(output: &str) -> Vec<NvidiaGpu> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let name = fields.next().filter(|n| !n.is_empty())?;
            let memory_mib = fields.next().and_then(|m| m.parse::<u64>().ok());
            let driver = fields.next().filter(|d| !d.is_empty()).map(str::to_string);
            Some(NvidiaGpu {
                name: name.to_string(),
                memory_mib,
                driver,
            })
        })
        .collect()
}

/// Pull the first card name and total VRAM out of `rocm-smi` text output.
pub fn parse_rocm_smi(output: &str) -> (Option<String>, Option<u64>) {
    let mut name = None;
    let mut vram = None;
    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        let value = match line.rsplit_once(':') {
            Some((_, v)) => v.trim(),
            None => continue,
        };
        if name.is_none() && lower.contains("card series") && !value.is_empty() {
            name = Some(value.to_string());
        } else if vram.is_none() && lower.contains("vram total memory") {
            vram = value.parse::<u64>().ok().map(|bytes| bytes / (1024 * 1024));
        }
    }
    (name, vram)
}

fn run_tool(program: &str, args: &[&str]) -> Option<String> {
    let path = find_executable(program)?;
    match Command::new(path).args(args).output() {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            debug!("{} exited with {}", program, output.status);
            None
        }
        Err(e) => {
            debug!("failed to run {}: {}", program, e);
            None
        }
    }
}
