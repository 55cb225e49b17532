//! SQL for the DuckDB paper table.
//!
//! One row per paper. Each tracked stage owns an output column plus
//! `{stage}_completed_at` / `{stage}_error`. Authors and categories are JSON
//! arrays in VARCHAR columns; dates and timestamps are bound as ISO strings
//! and cast in SQL.

use paperflow_core::Stage;

pub fn create_schema() -> &'static str {
    "CREATE TABLE IF NOT EXISTS papers (
         id VARCHAR PRIMARY KEY,
         title VARCHAR NOT NULL,
         abstract VARCHAR NOT NULL,
         authors VARCHAR NOT NULL,
         categories VARCHAR NOT NULL,
         submission_date DATE NOT NULL,
         update_date DATE NOT NULL,
         content_location VARCHAR,
         download_completed_at TIMESTAMP,
         download_error VARCHAR,
         extracted_text VARCHAR,
         extract_completed_at TIMESTAMP,
         extract_error VARCHAR,
         translated_text VARCHAR,
         translate_completed_at TIMESTAMP,
         translate_error VARCHAR
     );
     CREATE INDEX IF NOT EXISTS idx_papers_submission_date ON papers (submission_date);"
}

/// Output, completion and error columns of a tracked stage.
pub struct StageColumns {
    pub output: &'static str,
    pub completed_at: &'static str,
    pub error: &'static str,
}

pub fn stage_columns(stage: Stage) -> Option<StageColumns> {
    let (output, completed_at, error) = match stage {
        Stage::Metadata => return None,
        Stage::Download => ("content_location", "download_completed_at", "download_error"),
        Stage::Extract => ("extracted_text", "extract_completed_at", "extract_error"),
        Stage::Translate => ("translated_text", "translate_completed_at", "translate_error"),
    };
    Some(StageColumns {
        output,
        completed_at,
        error,
    })
}

/// Predicate: the stage before `stage` is complete.
fn prior_complete(stage: Stage) -> String {
    match stage.previous().and_then(stage_columns) {
        Some(prev) => format!("{} IS NOT NULL", prev.completed_at),
        None => "TRUE".to_string(),
    }
}

/// Column list read by `read_row` in the DuckDB store, in that order.
const PAPER_COLUMNS: &str = "id, title, abstract, authors, categories, \
     CAST(submission_date AS VARCHAR), CAST(update_date AS VARCHAR), \
     content_location, CAST(download_completed_at AS VARCHAR), download_error, \
     extracted_text, CAST(extract_completed_at AS VARCHAR), extract_error, \
     translated_text, CAST(translate_completed_at AS VARCHAR), translate_error";

pub fn select_paper() -> String {
    format!("SELECT {PAPER_COLUMNS} FROM papers WHERE id = ?")
}

/// Eligible papers for `stage`; one `LIMIT` parameter.
///
/// Never-attempted papers sort before failed ones, so a batch of permanent
/// failures cannot hide pending work.
pub fn select_eligible(stage: Stage, cols: &StageColumns) -> String {
    format!(
        "SELECT {PAPER_COLUMNS} FROM papers \
         WHERE {} AND {} IS NULL \
         ORDER BY {} IS NOT NULL, submission_date DESC, id ASC \
         LIMIT ?",
        prior_complete(stage),
        cols.completed_at,
        cols.error,
    )
}

/// Guarded completion; parameters: output, timestamp, id.
///
/// Touches no row when the stage is already complete or its prior stage is not.
pub fn mark_success(stage: Stage, cols: &StageColumns) -> String {
    format!(
        "UPDATE papers SET {out} = ?, {done} = CAST(? AS TIMESTAMP), {err} = NULL \
         WHERE id = ? AND {done} IS NULL AND {prior}",
        out = cols.output,
        done = cols.completed_at,
        err = cols.error,
        prior = prior_complete(stage),
    )
}

/// Guarded failure; parameters: message, id.
pub fn mark_failure(cols: &StageColumns) -> String {
    format!(
        "UPDATE papers SET {err} = ? WHERE id = ? AND {done} IS NULL",
        err = cols.error,
        done = cols.completed_at,
    )
}

/// Completion state used to explain a guarded update that touched no row.
pub fn select_completion(stage: Stage, cols: &StageColumns) -> String {
    format!(
        "SELECT {} IS NOT NULL, {} FROM papers WHERE id = ?",
        cols.completed_at,
        prior_complete(stage),
    )
}

pub fn select_descriptive() -> &'static str {
    "SELECT title, abstract, authors, categories, CAST(update_date AS VARCHAR) \
     FROM papers WHERE id = ?"
}

pub fn insert_paper() -> &'static str {
    "INSERT INTO papers (id, title, abstract, authors, categories, submission_date, update_date) \
     VALUES (?, ?, ?, ?, ?, CAST(? AS DATE), CAST(? AS DATE))"
}

/// `submission_date` is indexed and never rewritten.
pub fn update_descriptive() -> &'static str {
    "UPDATE papers SET title = ?, abstract = ?, authors = ?, categories = ?, \
     update_date = CAST(? AS DATE) WHERE id = ?"
}

/// One row per tracked stage: blocked, pending, done, failed.
pub fn stage_counts(stage: Stage, cols: &StageColumns) -> String {
    let prior = prior_complete(stage);
    let done = cols.completed_at;
    let err = cols.error;
    format!(
        "SELECT \
             COUNT(*) FILTER (WHERE NOT ({prior})), \
             COUNT(*) FILTER (WHERE ({prior}) AND {done} IS NULL AND {err} IS NULL), \
             COUNT(*) FILTER (WHERE {done} IS NOT NULL), \
             COUNT(*) FILTER (WHERE ({prior}) AND {done} IS NULL AND {err} IS NOT NULL) \
         FROM papers"
    )
}

/// Failed papers of a stage; one `LIMIT` parameter.
pub fn select_failures(cols: &StageColumns) -> String {
    format!(
        "SELECT id, {err} FROM papers \
         WHERE {done} IS NULL AND {err} IS NOT NULL \
         ORDER BY id LIMIT ?",
        err = cols.error,
        done = cols.completed_at,
    )
}
