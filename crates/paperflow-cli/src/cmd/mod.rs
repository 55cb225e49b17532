pub mod run;
pub mod show;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use paperflow_store::DuckDbStore;

/// Table with the house style and cyan headers.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

/// Open an existing state database; inspection commands never create one.
pub fn open_existing(path: &Path) -> Result<DuckDbStore> {
    if !path.exists() {
        anyhow::bail!(
            "no state database at {} (run `paperflow run` first)",
            path.display()
        );
    }
    DuckDbStore::open(path).with_context(|| format!("failed to open {}", path.display()))
}

/// First `max` characters of a single-line rendering of `s`.
pub fn clip(s: &str, max: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut out: String = flat.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
