//! Persisting a chosen config for the user's own launch scripts.

use av_types::{AvResult, Config, ExportError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
    Dotenv,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "dotenv" | "env" => Ok(Self::Dotenv),
            other => Err(ExportError::UnknownFormat {
                format: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Yaml => f.write_str("yaml"),
            Self::Dotenv => f.write_str("dotenv"),
        }
    }
}

pub fn render_config(config: &Config, format: ExportFormat) -> AvResult<String> {
    let text = match format {
        ExportFormat::Json => serde_json::to_string_pretty(config)? + "\n",
        ExportFormat::Yaml => serde_yaml::to_string(config).map_err(|e| ExportError::Encode {
            format: format.to_string(),
            message: e.to_string(),
        })?,
        ExportFormat::Dotenv => {
            let value = serde_json::to_value(config)?;
            let mut lines = Vec::new();
            if let serde_json::Value::Object(fields) = value {
                for (key, value) in fields {
                    let rendered = match value {
                        serde_json::Value::Null => continue,
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    lines.push(format!("AUTOVRAM_{}={}", key.to_ascii_uppercase(), rendered));
                }
            }
            lines.join("\n") + "\n"
        }
    };
    Ok(text)
}

pub fn export_config<P: AsRef<Path>>(
    config: &Config,
    format: ExportFormat,
    out_path: P,
) -> AvResult<()> {
    let out_path = out_path.as_ref();
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(out_path, render_config(config, format)?)?;
    info!("Exported {} config to {}", format, out_path.display());
    Ok(())
}

/// Read back a config previously exported as JSON.
pub fn load_config<P: AsRef<Path>>(path: P) -> AvResult<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ExportError::NotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
