//! DuckDB-backed [`StateStore`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection, Row};
use paperflow_core::{Paper, PaperMetadata, Stage, StageOutput, StageRecord};

use crate::error::StoreError;
use crate::sql;
use crate::state::{StageCounts, StateStore, UpsertOutcome};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Paper table in a DuckDB database file.
///
/// DuckDB allows a single writer, so the connection sits behind a mutex and
/// every trait method holds it for exactly one logical update.
#[derive(Debug)]
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Corrupt {
                    id: path.display().to_string(),
                    reason: format!("cannot create parent directory: {e}"),
                })?;
            }
        }
        let conn = Connection::open(path)?;
        log::debug!("opened state database {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(sql::create_schema())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("state database lock poisoned")
    }

    fn query_papers(
        conn: &Connection,
        query: &str,
        param: impl duckdb::ToSql,
    ) -> Result<Vec<Paper>, StoreError> {
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map(params![param], read_row)?;
        let mut papers = Vec::new();
        for raw in rows {
            papers.push(raw?.into_paper()?);
        }
        Ok(papers)
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn encode_list(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}

/// Columns as stored, before decoding.
struct RawPaper {
    id: String,
    title: String,
    abstract_text: String,
    authors: String,
    categories: String,
    submission_date: String,
    update_date: String,
    stages: [(Option<String>, Option<String>, Option<String>); 3],
}

/// Row reader for the column list of `sql::select_paper`.
fn read_row(row: &Row<'_>) -> duckdb::Result<RawPaper> {
    let stage = |base: usize| -> duckdb::Result<(Option<String>, Option<String>, Option<String>)> {
        Ok((row.get(base)?, row.get(base + 1)?, row.get(base + 2)?))
    };
    Ok(RawPaper {
        id: row.get(0)?,
        title: row.get(1)?,
        abstract_text: row.get(2)?,
        authors: row.get(3)?,
        categories: row.get(4)?,
        submission_date: row.get(5)?,
        update_date: row.get(6)?,
        stages: [stage(7)?, stage(10)?, stage(13)?],
    })
}

impl RawPaper {
    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            id: self.id.clone(),
            reason: reason.into(),
        }
    }

    fn list(&self, field: &str, raw: &str) -> Result<Vec<String>, StoreError> {
        serde_json::from_str(raw).map_err(|e| self.corrupt(format!("{field}: {e}")))
    }

    fn date(&self, field: &str, raw: &str) -> Result<NaiveDate, StoreError> {
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|e| self.corrupt(format!("{field} {raw:?}: {e}")))
    }

    fn timestamp(&self, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, StoreError> {
        raw.map(|s| {
            NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                .map(|t| t.and_utc())
                .map_err(|e| self.corrupt(format!("timestamp {s:?}: {e}")))
        })
        .transpose()
    }

    fn into_paper(self) -> Result<Paper, StoreError> {
        let metadata = PaperMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            abstract_text: self.abstract_text.clone(),
            authors: self.list("authors", &self.authors)?,
            categories: self.list("categories", &self.categories)?,
            submission_date: self.date("submission_date", &self.submission_date)?,
            update_date: self.date("update_date", &self.update_date)?,
        };
        let mut paper = Paper::new(metadata);
        for (stage, (output, completed_at, error)) in Stage::TRACKED.into_iter().zip(&self.stages) {
            let record = StageRecord {
                completed_at: self.timestamp(completed_at.as_deref())?,
                error: error.clone(),
            };
            match stage {
                Stage::Download => paper.content_location = output.clone(),
                Stage::Extract => paper.extracted_text = output.clone(),
                Stage::Translate => paper.translated_text = output.clone(),
                Stage::Metadata => {}
            }
            if let Some(slot) = paper.record_mut(stage) {
                *slot = record;
            }
        }
        paper.check_invariants().map_err(|reason| self.corrupt(reason))?;
        Ok(paper)
    }
}

impl StateStore for DuckDbStore {
    fn fetch_eligible(&self, stage: Stage, limit: usize) -> Result<Vec<Paper>, StoreError> {
        let cols = sql::stage_columns(stage).ok_or(StoreError::UnsupportedStage(stage))?;
        let conn = self.lock();
        Self::query_papers(&conn, &sql::select_eligible(stage, &cols), limit_param(limit))
    }

    fn record_success(&self, paper_id: &str, output: StageOutput) -> Result<bool, StoreError> {
        let stage = output.stage();
        let cols = sql::stage_columns(stage).ok_or(StoreError::UnsupportedStage(stage))?;
        let conn = self.lock();
        let updated = conn.execute(
            &sql::mark_success(stage, &cols),
            params![output.value(), format_timestamp(Utc::now()), paper_id],
        )?;
        if updated > 0 {
            return Ok(true);
        }

        let mut stmt = conn.prepare(&sql::select_completion(stage, &cols))?;
        let state = stmt
            .query_map(params![paper_id], |row| {
                Ok((row.get::<_, bool>(0)?, row.get::<_, bool>(1)?))
            })?
            .next()
            .transpose()?;
        match state {
            None => Err(StoreError::NotFound(paper_id.to_string())),
            Some((true, _)) => Ok(false),
            Some((false, _)) => Err(StoreError::OutOfOrder {
                id: paper_id.to_string(),
                stage,
            }),
        }
    }

    fn record_failure(
        &self,
        paper_id: &str,
        stage: Stage,
        message: &str,
    ) -> Result<bool, StoreError> {
        let cols = sql::stage_columns(stage).ok_or(StoreError::UnsupportedStage(stage))?;
        let conn = self.lock();
        let updated = conn.execute(&sql::mark_failure(&cols), params![message, paper_id])?;
        if updated > 0 {
            return Ok(true);
        }
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM papers WHERE id = ?",
            params![paper_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            Err(StoreError::NotFound(paper_id.to_string()))
        } else {
            Ok(false)
        }
    }

    fn upsert_metadata(&self, metadata: &PaperMetadata) -> Result<UpsertOutcome, StoreError> {
        let authors = encode_list(&metadata.authors);
        let categories = encode_list(&metadata.categories);
        let update_date = metadata.update_date.format(DATE_FORMAT).to_string();

        let conn = self.lock();
        let existing = {
            let mut stmt = conn.prepare(sql::select_descriptive())?;
            let row = stmt
                .query_map(params![metadata.id], |row| {
                    Ok([
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ])
                })?
                .next()
                .transpose()?;
            row
        };

        let Some(current) = existing else {
            conn.execute(
                sql::insert_paper(),
                params![
                    metadata.id,
                    metadata.title,
                    metadata.abstract_text,
                    authors,
                    categories,
                    metadata.submission_date.format(DATE_FORMAT).to_string(),
                    update_date,
                ],
            )?;
            return Ok(UpsertOutcome::Inserted);
        };

        let incoming = [
            metadata.title.as_str(),
            metadata.abstract_text.as_str(),
            authors.as_str(),
            categories.as_str(),
            update_date.as_str(),
        ];
        if current.iter().map(String::as_str).eq(incoming) {
            return Ok(UpsertOutcome::Unchanged);
        }
        conn.execute(
            sql::update_descriptive(),
            params![
                metadata.title,
                metadata.abstract_text,
                authors,
                categories,
                update_date,
                metadata.id,
            ],
        )?;
        Ok(UpsertOutcome::Updated)
    }

    fn get(&self, paper_id: &str) -> Result<Option<Paper>, StoreError> {
        let conn = self.lock();
        let mut papers = Self::query_papers(&conn, &sql::select_paper(), paper_id)?;
        Ok(papers.pop())
    }

    fn stage_counts(&self) -> Result<Vec<(Stage, StageCounts)>, StoreError> {
        let conn = self.lock();
        let mut out = Vec::with_capacity(Stage::TRACKED.len());
        for stage in Stage::TRACKED {
            let Some(cols) = sql::stage_columns(stage) else {
                continue;
            };
            let counts = conn.query_row(&sql::stage_counts(stage, &cols), [], |row| {
                Ok(StageCounts {
                    blocked: row.get::<_, i64>(0)? as u64,
                    pending: row.get::<_, i64>(1)? as u64,
                    done: row.get::<_, i64>(2)? as u64,
                    failed: row.get::<_, i64>(3)? as u64,
                })
            })?;
            out.push((stage, counts));
        }
        Ok(out)
    }

    fn failures(&self, stage: Stage, limit: usize) -> Result<Vec<(String, String)>, StoreError> {
        let cols = sql::stage_columns(stage).ok_or(StoreError::UnsupportedStage(stage))?;
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql::select_failures(&cols))?;
        let rows = stmt.query_map(params![limit_param(limit)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
