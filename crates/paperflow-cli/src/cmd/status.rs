//! `paperflow status` - per-stage progress and recent failures

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};
use paperflow_core::{Stage, fmt_count};
use paperflow_store::StateStore;

use crate::cmd::{clip, open_existing, table};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Failed papers to list per stage (0 to hide)
    #[arg(long, default_value_t = 5)]
    pub failures: usize,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let store = open_existing(&config.storage.database)?;
    let counts = store.stage_counts()?;

    let mut t = table(&["Stage", "Blocked", "Pending", "Done", "Failed", "Total"]);
    for (stage, c) in &counts {
        let failed = if c.failed > 0 {
            Cell::new(fmt_count(c.failed)).fg(Color::Red)
        } else {
            Cell::new("0")
        };
        t.add_row(vec![
            Cell::new(stage),
            Cell::new(fmt_count(c.blocked)).fg(Color::DarkGrey),
            Cell::new(fmt_count(c.pending)),
            Cell::new(fmt_count(c.done)).fg(Color::Green),
            failed,
            Cell::new(fmt_count(c.total())),
        ]);
    }
    eprintln!("\n{t}");

    if args.failures == 0 {
        return Ok(());
    }
    for stage in Stage::TRACKED {
        let failures = store.failures(stage, args.failures)?;
        if failures.is_empty() {
            continue;
        }
        let mut t = table(&["Paper", "Error"]);
        for (id, error) in &failures {
            t.add_row(vec![Cell::new(id), Cell::new(clip(error, 100))]);
        }
        eprintln!("\n{stage} failures (latest {}):\n{t}", failures.len());
    }
    Ok(())
}
