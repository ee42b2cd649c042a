use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Accelerator family found on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compute {
    #[serde(rename = "CUDA")]
    Cuda,
    #[serde(rename = "ROCm")]
    Rocm,
    #[serde(rename = "Metal")]
    Metal,
    #[serde(rename = "CPU")]
    Cpu,
}

impl fmt::Display for Compute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cuda => "CUDA",
            Self::Rocm => "ROCm",
            Self::Metal => "Metal",
            Self::Cpu => "CPU",
        };
        f.write_str(name)
    }
}

/// Read-only host description. Used for reporting only; search decisions never
/// look at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub compute: Compute,
    pub gpu_name: Option<String>,
    pub vram_total_mib: Option<u64>,
    pub extra: BTreeMap<String, String>,
}

impl SystemInfo {
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            "System summary".to_string(),
            "──────────────".to_string(),
            format!("OS: {} ({})", self.os, self.arch),
            format!("Compute: {}", self.compute),
        ];

        if let Some(name) = &self.gpu_name {
            lines.push(format!("GPU: {name}"));
        }
        if let Some(vram) = self.vram_total_mib {
            lines.push(format!("VRAM: {vram} MiB"));
        }
        // BTreeMap keeps these sorted and stable
        for (key, value) in &self.extra {
            lines.push(format!("{key}: {value}"));
        }

        lines
    }
}
