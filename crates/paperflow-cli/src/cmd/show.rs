//! `paperflow show` - one paper's metadata and stage progress

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};
use paperflow_core::{Paper, Stage, StageStatus};
use paperflow_store::StateStore;

use crate::cmd::{clip, open_existing, table};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// arXiv id, with or without version suffix or abs/ URL
    pub id: String,

    /// Print the extracted text to stdout
    #[arg(long, conflicts_with = "translated")]
    pub extracted: bool,

    /// Print the translated text to stdout
    #[arg(long)]
    pub translated: bool,
}

pub fn run(args: ShowArgs, config: &Config) -> Result<()> {
    let store = open_existing(&config.storage.database)?;
    let id = paperflow_arxiv::normalize_id(&args.id);
    let Some(paper) = store.get(&id)? else {
        anyhow::bail!("paper {id} not found");
    };

    if args.extracted || args.translated {
        let (stage, text) = if args.extracted {
            (Stage::Extract, &paper.extracted_text)
        } else {
            (Stage::Translate, &paper.translated_text)
        };
        match text {
            Some(text) => println!("{text}"),
            None => anyhow::bail!("{id}: {stage} is {}", paper.status(stage)),
        }
        return Ok(());
    }

    eprintln!("\n{}", describe(&paper));
    eprintln!("{}", progress(&paper));
    Ok(())
}

fn describe(paper: &Paper) -> comfy_table::Table {
    let m = &paper.metadata;
    let mut t = table(&["Field", "Value"]);
    t.add_row(vec!["Id", m.id.as_str()]);
    t.add_row(vec!["Title", m.title.as_str()]);
    t.add_row(vec!["Authors".to_string(), m.authors.join(", ")]);
    t.add_row(vec!["Categories".to_string(), m.categories.join(" ")]);
    t.add_row(vec!["Submitted".to_string(), m.submission_date.to_string()]);
    t.add_row(vec!["Updated".to_string(), m.update_date.to_string()]);
    t.add_row(vec!["Abstract".to_string(), clip(&m.abstract_text, 200)]);
    t
}

fn progress(paper: &Paper) -> comfy_table::Table {
    let mut t = table(&["Stage", "Status", "Completed", "Output", "Error"]);
    for stage in Stage::TRACKED {
        let Some(record) = paper.record(stage) else {
            continue;
        };
        let status = paper.status(stage);
        let color = match status {
            StageStatus::Done => Color::Green,
            StageStatus::Failed => Color::Red,
            StageStatus::Pending => Color::Yellow,
            StageStatus::Blocked => Color::DarkGrey,
        };
        let output = match (stage, paper.output(stage)) {
            (Stage::Download, Some(location)) => location.to_string(),
            (_, Some(text)) => format!("{} chars", text.chars().count()),
            (_, None) => String::new(),
        };
        t.add_row(vec![
            Cell::new(stage),
            Cell::new(status).fg(color),
            Cell::new(
                record
                    .completed_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(output),
            Cell::new(record.error.as_deref().map(|e| clip(e, 80)).unwrap_or_default()),
        ]);
    }
    t
}
