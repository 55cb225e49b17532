//! Stage progress bars.
//!
//! On a terminal every running stage gets an indicatif bar counting its work
//! units. Elsewhere bars are hidden and the per-stage log lines are the only
//! progress output.

use std::io::IsTerminal;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const STAGE_TEMPLATE: &str =
    "{prefix:>10.cyan.bold} [{bar:32.green/dim}] {pos:>4}/{len:<4} {elapsed:>4} {wide_msg:.dim}";

/// Owner of the bars drawn during a run.
pub struct ProgressContext {
    multi: MultiProgress,
    draw: bool,
}

/// Shared between the CLI and the coordinator.
pub type SharedProgress = Arc<ProgressContext>;

impl ProgressContext {
    /// Draw bars only when stderr is a terminal.
    pub fn new() -> Self {
        Self::with_drawing(std::io::stderr().is_terminal())
    }

    /// Never draws; for tests and embedding.
    pub fn hidden() -> Self {
        Self::with_drawing(false)
    }

    fn with_drawing(draw: bool) -> Self {
        let multi = if draw {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self { multi, draw }
    }

    /// Bar counting the `units` of one stage run.
    pub fn stage_bar(&self, stage: &str, units: usize) -> ProgressBar {
        if !self.draw {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(units as u64).with_prefix(stage.to_string());
        if let Ok(style) = ProgressStyle::with_template(STAGE_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        self.multi.add(bar)
    }

    pub fn is_tty(&self) -> bool {
        self.draw
    }

    /// Bar container the log bridge prints around.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// `1234567` → `1,234,567`
pub fn fmt_count(n: u64) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - head) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
