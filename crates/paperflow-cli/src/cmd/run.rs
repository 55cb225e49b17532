//! `paperflow run` - advance papers through the pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use comfy_table::{Cell, Color};
use paperflow_arxiv::{ArxivFetcher, ArxivSource};
use paperflow_core::{CancelToken, HttpClient, MetadataQuery, SharedProgress, Stage, fmt_count};
use paperflow_pipeline::{Collaborators, Coordinator, ExecutionReport, PassReport};
use paperflow_store::{DuckDbStore, FsBlobStore, StateStore};
use paperflow_text::{ChunkedTranslator, OllamaClient, PdfTextExtractor};

use crate::cmd::table;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Papers per stage per pass (overrides [pipeline].batch_size)
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Repeat passes until one makes no progress
    #[arg(long, conflicts_with = "interval")]
    pub until_idle: bool,

    /// Upper bound on passes with --until-idle
    #[arg(long, default_value_t = 100)]
    pub max_passes: usize,

    /// Run a pass every SECS seconds until interrupted
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Ingest this arXiv category in addition to configured queries
    #[arg(long, requires_all = ["from", "to"])]
    pub category: Option<String>,

    /// First submission day of --category (YYYY-MM-DD)
    #[arg(long, requires = "category")]
    pub from: Option<NaiveDate>,

    /// Last submission day of --category (YYYY-MM-DD)
    #[arg(long, requires = "category")]
    pub to: Option<NaiveDate>,

    /// Maximum records for --category
    #[arg(long, requires = "category")]
    pub limit: Option<usize>,
}

impl RunArgs {
    fn query(&self) -> Option<MetadataQuery> {
        Some(MetadataQuery {
            category: self.category.clone()?,
            start_date: self.from?,
            end_date: self.to?,
            limit: self.limit,
        })
    }
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let mut pipeline = config.pipeline.clone();
    if let Some(query) = args.query() {
        pipeline.queries.push(query);
    }
    let batch_size = args.batch_size.unwrap_or(pipeline.batch_size);
    pipeline.batch_size = batch_size;

    let db = &config.storage.database;
    let store: Arc<dyn StateStore> = Arc::new(
        DuckDbStore::open(db).with_context(|| format!("failed to open {}", db.display()))?,
    );
    let coordinator = Coordinator::new(pipeline, store, collaborators(config)?, progress.clone())
        .context("invalid pipeline configuration")?;

    let cancel = CancelToken::new();
    install_signal_handlers(&cancel)?;

    let reports = if args.until_idle {
        coordinator.run_until_idle(batch_size, args.max_passes, &cancel)?
    } else if let Some(secs) = args.interval {
        run_on_interval(&coordinator, batch_size, Duration::from_secs(secs), &cancel)?
    } else {
        vec![coordinator.run_once_with_cancel(batch_size, &cancel)?]
    };

    print_summary(&reports);
    if reports.iter().any(|r| r.cancelled) {
        log::warn!("Interrupted; unfinished papers are picked up by the next run");
    }
    Ok(())
}

fn collaborators(config: &Config) -> Result<Collaborators> {
    let http_config = config.http.to_http_config();
    let http = HttpClient::new(&http_config).context("failed to build HTTP client")?;
    let backend = OllamaClient::new(&config.translator, &http_config)
        .context("failed to build translator client")?;
    let storage = &config.storage;
    Ok(Collaborators {
        source: Arc::new(ArxivSource::new(config.arxiv.clone(), http.clone())),
        fetcher: Arc::new(ArxivFetcher::new(config.arxiv.clone(), http)),
        blobs: Arc::new(FsBlobStore::new(
            storage.blob_dir.clone(),
            storage.blob_prefix.clone(),
        )),
        extractor: Arc::new(PdfTextExtractor::new()),
        translator: Arc::new(ChunkedTranslator::new(backend, &config.translator)),
    })
}

/// Passes on a fixed schedule, each re-ingesting configured queries.
fn run_on_interval(
    coordinator: &Coordinator,
    batch_size: usize,
    every: Duration,
    cancel: &CancelToken,
) -> Result<Vec<PassReport>> {
    let mut reports = Vec::new();
    loop {
        let started = Instant::now();
        let report = coordinator.run_once_with_cancel(batch_size, cancel)?;
        let cancelled = report.cancelled;
        reports.push(report);
        if cancelled {
            return Ok(reports);
        }
        log::info!("Next pass in {}s", every.as_secs());
        while started.elapsed() < every {
            if cancel.is_cancelled() {
                return Ok(reports);
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }
}

fn install_signal_handlers(cancel: &CancelToken) -> Result<()> {
    // First signal: stop claiming new papers, let in-flight ones finish
    // Second signal: force exit
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let token = cancel.clone();
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, move || {
                if token.cancel() {
                    std::process::exit(130);
                }
            })
        }
        .context("failed to register signal handler")?;
    }
    Ok(())
}

fn print_summary(reports: &[PassReport]) {
    let mut t = table(&["Stage", "Papers", "Done", "Retried", "Failed", "Skipped", "Calls", "Time"]);
    for stage in Stage::ALL {
        let runs: Vec<_> = reports.iter().filter_map(|r| r.stage(stage)).collect();
        if runs.is_empty() {
            continue;
        }
        let sum = |f: fn(&ExecutionReport) -> usize| -> u64 {
            runs.iter().map(|r| f(r) as u64).sum()
        };
        let failed = sum(|r| r.failed);
        let failed_cell = if failed > 0 {
            Cell::new(fmt_count(failed)).fg(Color::Red)
        } else {
            Cell::new("0")
        };
        let elapsed: Duration = runs.iter().map(|r| r.elapsed).sum();
        t.add_row(vec![
            Cell::new(stage),
            Cell::new(fmt_count(sum(|r| r.total))),
            Cell::new(fmt_count(sum(|r| r.succeeded))).fg(Color::Green),
            Cell::new(fmt_count(sum(|r| r.retried_then_succeeded))),
            failed_cell,
            Cell::new(fmt_count(sum(|r| r.skipped))),
            Cell::new(fmt_count(sum(|r| r.calls))),
            Cell::new(format!("{:.1}s", elapsed.as_secs_f64())),
        ]);
    }

    let ingested = reports.iter().fold((0u64, 0u64, 0u64), |acc, r| {
        (
            acc.0 + r.ingest.records as u64,
            acc.1 + r.ingest.inserted as u64,
            acc.2 + r.ingest.updated as u64,
        )
    });
    let total: Duration = reports.iter().map(|r| r.elapsed).sum();

    eprintln!("\n{t}");
    eprintln!(
        "{} pass{}, {} metadata records ({} new, {} updated) in {:.1}s",
        reports.len(),
        if reports.len() == 1 { "" } else { "es" },
        fmt_count(ingested.0),
        fmt_count(ingested.1),
        fmt_count(ingested.2),
        total.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn adhoc_query_from_flags() {
        let cli = Cli::try_parse_from([
            "run",
            "--category",
            "physics.geo-ph",
            "--from",
            "2025-03-01",
            "--to",
            "2025-03-02",
            "--limit",
            "5",
        ])
        .unwrap();
        let q = cli.run.query().unwrap();
        assert_eq!(q.category, "physics.geo-ph");
        assert_eq!(q.start_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(q.limit, Some(5));
    }

    #[test]
    fn category_requires_dates() {
        assert!(Cli::try_parse_from(["run", "--category", "cs.CL"]).is_err());
    }

    #[test]
    fn until_idle_conflicts_with_interval() {
        assert!(Cli::try_parse_from(["run", "--until-idle", "--interval", "60"]).is_err());
    }

    #[test]
    fn no_flags_no_query() {
        let cli = Cli::try_parse_from(["run"]).unwrap();
        assert!(cli.run.query().is_none());
        assert_eq!(cli.run.max_passes, 100);
    }
}
