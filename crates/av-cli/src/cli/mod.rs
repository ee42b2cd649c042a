pub mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "autovram")]
#[command(about = "Find the largest stable batch size and precision for your training command", long_about = None)]
struct Cli {
    /// Directory for run artifacts and the exported config
    #[arg(long, global = true, env = "AUTOVRAM_HOME", default_value = ".autovram")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a compact system summary
    Info {
        /// Print JSON output
        #[arg(long)]
        json: bool,
    },
    /// Check prerequisites and provide actionable guidance
    Doctor,
    /// Tune a script by running it repeatedly with different AUTOVRAM_* env vars
    Tune {
        /// Command to run (quoted)
        #[arg(long)]
        cmd: String,
        /// Metric key to parse from stdout
        #[arg(long, default_value = "it_per_s")]
        metric: String,
        /// Timeout per trial (seconds)
        #[arg(long, default_value = "60")]
        timeout: f64,
        /// Maximum number of trials per candidate
        #[arg(long, default_value = "25")]
        max_trials: usize,
        /// Batch size the search starts from
        #[arg(long, default_value = "1")]
        min_batch_size: u32,
        /// Candidate engine: heuristic, torch, vllm, llm-autobatch
        #[arg(long, default_value = "heuristic")]
        engine: String,
    },
    /// Export a conservative vLLM starter config
    TuneVllm {
        /// Model name or path
        #[arg(long)]
        model: String,
        /// Max model length
        #[arg(long, default_value = "4096")]
        max_model_len: u64,
    },
    /// Convert the last exported config to another format
    Export {
        /// json|yaml|dotenv
        #[arg(long, default_value = "json")]
        format: String,
        /// Output path (defaults to the config directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Info { json } => commands::info(json),
        Commands::Doctor => commands::doctor(),
        Commands::Tune {
            cmd,
            metric,
            timeout,
            max_trials,
            min_batch_size,
            engine,
        } => {
            commands::tune(
                &cli.dir,
                commands::TuneArgs {
                    cmd,
                    metric,
                    timeout,
                    max_trials,
                    min_batch_size,
                    engine,
                },
            )
            .await
        }
        Commands::TuneVllm {
            model,
            max_model_len,
        } => commands::tune_vllm(&cli.dir, &model, max_model_len),
        Commands::Export { format, out } => commands::export(&cli.dir, &format, out),
    }?;

    Ok(ExitCode::from(code))
}
