//! paperflow - resumable arXiv paper pipeline
//!
//! Ingests arXiv metadata, downloads PDFs, extracts their text and
//! translates it, recording per-paper progress in DuckDB so any run can be
//! interrupted and resumed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "paperflow")]
#[command(about = "Resumable arXiv pipeline: metadata, PDF, text, translation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./paperflow.toml or ~/.config/paperflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State database (overrides [storage].database)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Advance eligible papers through the pipeline
    Run(cmd::run::RunArgs),
    /// Per-stage progress and recent failures
    Status(cmd::status::StatusArgs),
    /// Metadata and stage progress of one paper
    Show(cmd::show::ShowArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = Arc::new(paperflow_core::ProgressContext::new());

    // Logging:
    //   TTY:     progress bars plus info logs routed around them
    //   non-TTY: plain timestamped lines
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    paperflow_core::init_logging(cli.quiet, cli.debug, multi);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if let Some(db) = cli.db {
        config.storage.database = db;
    }

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Status(args) => cmd::status::run(args, &config),
        Command::Show(args) => cmd::show::run(args, &config),
        Command::Config => {
            show_config(&config);
            Ok(())
        }
    }
}

fn show_config(config: &Config) {
    let pipeline = &config.pipeline;
    let mut table = cmd::table(&["Setting", "Value"]);

    table.add_row(vec![
        "Database".to_string(),
        config.storage.database.display().to_string(),
    ]);
    table.add_row(vec![
        "Blob store".to_string(),
        config
            .storage
            .blob_dir
            .join(&config.storage.blob_prefix)
            .display()
            .to_string(),
    ]);
    table.add_row(vec!["Batch size".to_string(), pipeline.batch_size.to_string()]);
    for stage in paperflow_core::Stage::ALL {
        let settings = pipeline.stages.get(stage);
        let key = settings.collaborator_key(stage);
        let limit = match pipeline.rate_limits.get(key) {
            Some(l) => format!("{}/s, burst {}", l.refill_per_sec, l.capacity),
            None => "unlimited".to_string(),
        };
        table.add_row(vec![
            format!("Stage {stage}"),
            format!("{} workers, {key}: {limit}", settings.concurrency),
        ]);
    }
    table.add_row(vec![
        "Retry".to_string(),
        format!(
            "{} attempts, {}ms base, {}ms max, ±{:.0}% jitter",
            pipeline.retry.max_attempts,
            pipeline.retry.base_delay_ms,
            pipeline.retry.max_delay_ms,
            pipeline.retry.jitter * 100.0
        ),
    ]);
    for query in &pipeline.queries {
        let limit = query
            .limit
            .map_or_else(|| "no limit".to_string(), |n| format!("limit {n}"));
        table.add_row(vec!["Query".to_string(), format!("{query}, {limit}")]);
    }
    table.add_row(vec!["arXiv API".to_string(), config.arxiv.api_url.clone()]);
    table.add_row(vec!["arXiv PDF".to_string(), config.arxiv.pdf_url.clone()]);
    table.add_row(vec![
        "Translator".to_string(),
        format!(
            "{} at {} ({} → {}, {} char chunks)",
            config.translator.model,
            config.translator.base_url,
            config.translator.source_lang,
            config.translator.target_lang,
            config.translator.chunk_size
        ),
    ]);
    table.add_row(vec![
        "HTTP timeouts".to_string(),
        format!(
            "connect {}s, request {}s",
            config.http.connect_timeout_secs, config.http.request_timeout_secs
        ),
    ]);

    eprintln!("\n{table}");
}
