use crate::diagnostics::{detect_system, doctor_notes};
use anyhow::Result;
use av_data::{export_config, load_config, ArtifactRecorder, ExportFormat, TimestampIds};
use av_optimizer::{
    resolve_source, SearchController, ServingSource, TuningConfig, TuningRun,
};
use av_runner::{find_executable, ProcessExecutor};
use av_types::{AvError, SystemInfo, TrialRecord};
use std::path::{Path, PathBuf};

pub const EXIT_OK: u8 = 0;
/// Ran fine but found nothing usable.
pub const EXIT_NOTHING_FOUND: u8 = 1;
/// Bad engine, missing optional dependency or bad arguments.
pub const EXIT_USAGE: u8 = 2;

pub const CONFIG_FILE: &str = "config.json";

fn print_summary(info: &SystemInfo) {
    for line in info.summary_lines() {
        println!("{}", line);
    }
}

pub fn info(json: bool) -> Result<u8> {
    let system = detect_system();
    if json {
        println!("{}", serde_json::to_string_pretty(&system)?);
    } else {
        print_summary(&system);
    }
    Ok(EXIT_OK)
}

pub fn doctor() -> Result<u8> {
    let system = detect_system();
    print_summary(&system);
    println!();

    let notes = doctor_notes(&system);
    if notes.is_empty() {
        println!("OK No obvious issues detected.");
        return Ok(EXIT_OK);
    }

    println!("Notes");
    for note in notes {
        println!("- {}", note);
    }
    Ok(EXIT_OK)
}

pub struct TuneArgs {
    pub cmd: String,
    pub metric: String,
    pub timeout: f64,
    pub max_trials: usize,
    pub min_batch_size: u32,
    pub engine: String,
}

pub async fn tune(dir: &Path, args: TuneArgs) -> Result<u8> {
    print_summary(&detect_system());
    println!();

    let source = match resolve_source(&args.engine) {
        Ok(source) => source,
        Err(e) => {
            println!("Engine error: {}", e);
            return Ok(EXIT_USAGE);
        }
    };

    let config = match TuningConfig::new(args.cmd).with_timeout_secs(args.timeout) {
        Ok(config) => config,
        Err(e) => {
            println!("Invalid --timeout: {}", e);
            return Ok(EXIT_USAGE);
        }
    };
    let config = config
        .with_objective(&args.metric)
        .with_max_trials(args.max_trials)
        .with_min_batch_size(args.min_batch_size)
        .with_source(source.name());

    let recorder = ArtifactRecorder::create_session(dir, &TimestampIds)?;
    let run_dir = recorder.session_dir().to_path_buf();
    let context = config
        .session_context(&run_dir, std::env::current_dir()?, source.name())
        .with_mode(source.mode());

    println!(
        "Tuning (engine={}, metric={})",
        source.name(),
        config.objective_metric
    );
    println!("────────────────────────────────────────");

    let executor = ProcessExecutor::new().with_grace_period(config.grace_period);
    let mut controller = SearchController::new(
        executor,
        context,
        config.command.clone(),
        config.search_settings(),
    )
    .with_recorder(recorder);

    let metric_name = config.objective_metric.as_str();
    let run = TuningRun::new(source.as_ref(), &mut controller).on_template(|result| {
        for record in &result.trials {
            println!("{}", trial_line(record, metric_name));
        }
    });
    let report = match run.run().await {
        Ok(report) => report,
        Err(AvError::CandidateSource(e)) => {
            println!("Engine error: {}", e);
            return Ok(EXIT_USAGE);
        }
        Err(e) => return Err(e.into()),
    };

    let Some(best) = report.best_config() else {
        println!("No stable configuration found.");
        println!("See run directory: {}", run_dir.display());
        return Ok(EXIT_NOTHING_FOUND);
    };

    let cfg_path = dir.join(CONFIG_FILE);
    export_config(best, ExportFormat::Json, &cfg_path)?;

    println!();
    println!("Best stable config");
    println!("──────────────────");
    println!("{}", serde_json::to_string_pretty(best)?);
    println!();
    println!("Exported: {}", cfg_path.display());
    println!("Run directory: {}", run_dir.display());
    Ok(EXIT_OK)
}

pub fn tune_vllm(dir: &Path, model: &str, max_model_len: u64) -> Result<u8> {
    print_summary(&detect_system());
    println!();

    if find_executable("vllm").is_none() {
        println!("vLLM is not installed. Install optional dependency: pip install vllm");
        return Ok(EXIT_USAGE);
    }

    println!("No offline vLLM benchmark loop is run; exporting a conservative starter config for {}.", model);

    let config = ServingSource::starter_config(max_model_len);
    let cfg_path = dir.join(CONFIG_FILE);
    export_config(&config, ExportFormat::Json, &cfg_path)?;

    println!();
    println!("Exported vLLM starter config");
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("Exported: {}", cfg_path.display());
    Ok(EXIT_OK)
}

pub fn export(dir: &Path, format: &str, out: Option<PathBuf>) -> Result<u8> {
    let config = match load_config(dir.join(CONFIG_FILE)) {
        Ok(config) => config,
        Err(e) => {
            println!("{}", e);
            return Ok(EXIT_NOTHING_FOUND);
        }
    };

    let format: ExportFormat = match format.parse() {
        Ok(format) => format,
        Err(e) => {
            println!("{}", e);
            return Ok(EXIT_USAGE);
        }
    };

    let out_path = out.unwrap_or_else(|| dir.join(default_file_name(format)));
    if let Err(e) = export_config(&config, format, &out_path) {
        println!("Export failed: {}", e);
        return Ok(EXIT_USAGE);
    }

    println!("Exported: {}", out_path.display());
    Ok(EXIT_OK)
}

fn default_file_name(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Json => CONFIG_FILE,
        ExportFormat::Yaml => "config.yaml",
        ExportFormat::Dotenv => "config.env",
    }
}

pub fn trial_line(record: &TrialRecord, metric_name: &str) -> String {
    let metric = record
        .metric_value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "-".to_string());
    let knob = match &record.config.serving.dtype {
        Some(dtype) => format!("dtype={}", dtype),
        None => format!("precision={}", record.config.precision),
    };
    format!(
        "Trial {:<2} cfg=batch_size={} {} → {}  {}={}",
        record.index,
        record.batch_size(),
        knob,
        record.status_label(),
        metric_name,
        metric
    )
}
