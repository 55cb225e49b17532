//! arXiv Atom feed parser using quick-xml

use anyhow::{Context, Result};
use chrono::NaiveDate;
use paperflow_core::PaperMetadata;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One page of API results.
#[derive(Debug, Default)]
pub struct AtomPage {
    /// `opensearch:totalResults` for the whole query
    pub total_results: Option<usize>,
    /// Paper entries on the page, including ones skipped as incomplete
    pub entries: usize,
    pub papers: Vec<PaperMetadata>,
    /// Message of an API error entry (bad query syntax, unknown category)
    pub api_error: Option<String>,
}

/// `<entry>` fields as they appear in the feed.
#[derive(Debug, Default)]
struct RawEntry {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    authors: Vec<String>,
    categories: Vec<String>,
}

/// Parse an Atom feed page returned by the arXiv query API.
pub fn parse_feed(xml: &str) -> Result<AtomPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = AtomPage::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"totalResults" => {
                    page.total_results = read_text(&mut reader)?.trim().parse().ok();
                }
                b"entry" => {
                    let raw = parse_entry(&mut reader)?;
                    if raw.id.contains("arxiv.org/api/errors") {
                        page.api_error = Some(collapse_whitespace(&raw.summary));
                        continue;
                    }
                    page.entries += 1;
                    match into_metadata(raw) {
                        Ok(paper) => page.papers.push(paper),
                        Err(reason) => log::warn!("skipping entry: {reason}"),
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).context("Atom parse error"),
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

fn parse_entry(reader: &mut Reader<&[u8]>) -> Result<RawEntry> {
    let mut entry = RawEntry::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"id" => entry.id = read_text(reader)?,
                b"title" => entry.title = read_text(reader)?,
                b"summary" => entry.summary = read_text(reader)?,
                b"published" => entry.published = read_text(reader)?,
                b"updated" => entry.updated = read_text(reader)?,
                b"author" => {
                    if let Some(name) = parse_author(reader)? {
                        entry.authors.push(name);
                    }
                }
                b"category" => push_term(&e, &mut entry.categories),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"category" => {
                push_term(&e, &mut entry.categories)
            }
            Event::End(e) if e.local_name().as_ref() == b"entry" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(entry)
}

/// `<author><name>..</name><arxiv:affiliation>..</arxiv:affiliation></author>`
fn parse_author(reader: &mut Reader<&[u8]>) -> Result<Option<String>> {
    let mut name = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"name" => {
                let text = collapse_whitespace(&read_text(reader)?);
                if !text.is_empty() {
                    name = Some(text);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"author" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(name)
}

fn push_term(e: &BytesStart<'_>, categories: &mut Vec<String>) {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"term" {
            let term = String::from_utf8_lossy(&attr.value).trim().to_string();
            if !term.is_empty() && !categories.contains(&term) {
                categories.push(term);
            }
        }
    }
}

/// Read text until the closing tag, descending into nested markup.
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::End(_) => break,
            Event::Start(_) => {
                text.push(' ');
                text.push_str(&read_text(reader)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

fn into_metadata(raw: RawEntry) -> std::result::Result<PaperMetadata, String> {
    let id = normalize_id(&raw.id);
    if id.is_empty() {
        return Err("entry without id".to_string());
    }
    let (Some(submission_date), Some(update_date)) =
        (parse_date(&raw.published), parse_date(&raw.updated))
    else {
        return Err(format!("{id}: missing published/updated date"));
    };
    Ok(PaperMetadata {
        id,
        title: collapse_whitespace(&raw.title),
        abstract_text: collapse_whitespace(&raw.summary),
        authors: raw.authors,
        categories: raw.categories,
        submission_date,
        update_date,
    })
}

/// `2025-03-01T18:00:01Z` → `2025-03-01`
fn parse_date(value: &str) -> Option<NaiveDate> {
    let day = value.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Stable id from an entry id URL: `http://arxiv.org/abs/2503.00001v2` →
/// `2503.00001`, `http://arxiv.org/abs/hep-th/9901001v1` → `hep-th/9901001`.
pub fn normalize_id(raw: &str) -> String {
    let raw = raw.trim();
    let id = raw.split_once("/abs/").map_or(raw, |(_, rest)| rest);
    strip_version(id).to_string()
}

fn strip_version(id: &str) -> &str {
    match id.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < id.len()
                && id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &id[..pos]
        }
        _ => id,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
