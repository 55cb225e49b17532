//! arXiv query API as a paged [`MetadataSource`].

use std::collections::VecDeque;
use std::time::Duration;

use paperflow_core::{
    CollaboratorError, ErrorKind, HttpClient, MetadataQuery, MetadataSource, MetadataStream,
    PaperMetadata,
};

use crate::config::ArxivConfig;
use crate::parser::{parse_feed, AtomPage};

/// Query URL for one page, oldest submissions first.
///
/// The date range covers whole days: `start 00:00` to `end 23:59`.
pub fn query_url(base: &str, query: &MetadataQuery, start: usize, max_results: usize) -> String {
    format!(
        "{base}?search_query=cat:{cat}+AND+submittedDate:[{from}0000+TO+{to}2359]\
         &start={start}&max_results={max_results}&sortBy=submittedDate&sortOrder=ascending",
        cat = query.category,
        from = query.start_date.format("%Y%m%d"),
        to = query.end_date.format("%Y%m%d"),
    )
}

/// Lazily walks result pages, fetching the next page only when the
/// previous one is drained.
///
/// Stops on a short or empty page, on `totalResults`, or once `limit`
/// records were yielded. A fetch error ends the sequence after being
/// yielded once.
pub struct FeedPages<F> {
    fetch: F,
    page_size: usize,
    page_delay: Duration,
    limit: Option<usize>,
    offset: usize,
    yielded: usize,
    total: Option<usize>,
    pages: usize,
    buffer: VecDeque<PaperMetadata>,
    done: bool,
}

impl<F> FeedPages<F>
where
    F: FnMut(usize, usize) -> Result<AtomPage, CollaboratorError>,
{
    /// `fetch(start, max_results)` returns one parsed page.
    pub fn new(fetch: F, page_size: usize, page_delay: Duration, limit: Option<usize>) -> Self {
        Self {
            fetch,
            page_size: page_size.max(1),
            page_delay,
            limit,
            offset: 0,
            yielded: 0,
            total: None,
            pages: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn fill(&mut self) -> Result<(), CollaboratorError> {
        if self.pages > 0 && !self.page_delay.is_zero() {
            std::thread::sleep(self.page_delay);
        }
        let want = match self.limit {
            Some(limit) => self.page_size.min(limit.saturating_sub(self.yielded)),
            None => self.page_size,
        };
        let page = (self.fetch)(self.offset, want)?;
        self.pages += 1;

        if self.total.is_none() {
            self.total = page.total_results;
            if let Some(total) = self.total {
                log::info!("query matches {total} papers");
            }
        }
        self.offset += page.entries;
        if page.entries == 0
            || page.entries < want
            || self.total.is_some_and(|total| self.offset >= total)
        {
            self.done = true;
        }
        log::debug!(
            "page {}: {} entries, {} usable, offset {}",
            self.pages,
            page.entries,
            page.papers.len(),
            self.offset
        );
        self.buffer.extend(page.papers);
        Ok(())
    }
}

impl<F> Iterator for FeedPages<F>
where
    F: FnMut(usize, usize) -> Result<AtomPage, CollaboratorError>,
{
    type Item = Result<PaperMetadata, CollaboratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                return None;
            }
            if let Some(paper) = self.buffer.pop_front() {
                self.yielded += 1;
                return Some(Ok(paper));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

/// arXiv metadata over the public Atom API.
pub struct ArxivSource {
    config: ArxivConfig,
    http: HttpClient,
}

impl ArxivSource {
    pub fn new(config: ArxivConfig, http: HttpClient) -> Self {
        log::info!(
            "arXiv source: {} ({} per page, {:.1}s between pages)",
            config.api_url,
            config.page_size,
            config.page_delay_secs
        );
        Self { config, http }
    }

    fn fetch_page(
        &self,
        query: &MetadataQuery,
        start: usize,
        max_results: usize,
    ) -> Result<AtomPage, CollaboratorError> {
        let url = query_url(&self.config.api_url, query, start, max_results);
        log::debug!("GET {url}");
        let body = self.http.get_text(&url)?;
        let page = parse_feed(&body).map_err(|e| {
            CollaboratorError::new(ErrorKind::Malformed, format!("arXiv feed: {e:#}"))
        })?;
        if let Some(message) = &page.api_error {
            return Err(CollaboratorError::new(
                ErrorKind::Malformed,
                format!("arXiv rejected query {query}: {message}"),
            ));
        }
        Ok(page)
    }
}

impl MetadataSource for ArxivSource {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn fetch_batch<'a>(&'a self, query: &'a MetadataQuery) -> MetadataStream<'a> {
        log::info!(
            "fetching {query}, limit: {}",
            query
                .limit
                .map_or_else(|| "unlimited".to_string(), |l| l.to_string())
        );
        Box::new(FeedPages::new(
            move |start, max_results| self.fetch_page(query, start, max_results),
            self.config.page_size,
            self.config.page_delay(),
            query.limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn query(limit: Option<usize>) -> MetadataQuery {
        MetadataQuery {
            category: "physics.geo-ph".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            limit,
        }
    }

    fn paper(n: usize) -> PaperMetadata {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        PaperMetadata {
            id: format!("2503.{n:05}"),
            title: format!("Paper {n}"),
            abstract_text: String::new(),
            authors: vec![],
            categories: vec![],
            submission_date: day,
            update_date: day,
        }
    }

    /// Simulates an API holding `total` results.
    fn fake_api(
        total: usize,
        calls: &std::cell::RefCell<Vec<(usize, usize)>>,
    ) -> impl FnMut(usize, usize) -> Result<AtomPage, CollaboratorError> + '_ {
        move |start, max| {
            calls.borrow_mut().push((start, max));
            let end = total.min(start + max);
            Ok(AtomPage {
                total_results: Some(total),
                entries: end.saturating_sub(start),
                papers: (start..end).map(paper).collect(),
                api_error: None,
            })
        }
    }

    #[test]
    fn url_format() {
        let url = query_url("http://export.arxiv.org/api/query", &query(None), 200, 100);
        assert_eq!(
            url,
            "http://export.arxiv.org/api/query?search_query=cat:physics.geo-ph+AND+\
             submittedDate:[202503010000+TO+202503022359]&start=200&max_results=100\
             &sortBy=submittedDate&sortOrder=ascending"
        );
    }

    #[test]
    fn walks_all_pages() {
        let calls = std::cell::RefCell::new(Vec::new());
        let pages = FeedPages::new(fake_api(250, &calls), 100, Duration::ZERO, None);
        let ids: Vec<String> = pages.map(|r| r.unwrap().id).collect();
        assert_eq!(ids.len(), 250);
        assert_eq!(ids[0], "2503.00000");
        assert_eq!(ids[249], "2503.00249");
        assert_eq!(*calls.borrow(), vec![(0, 100), (100, 100), (200, 100)]);
    }

    #[test]
    fn limit_shrinks_last_page() {
        let calls = std::cell::RefCell::new(Vec::new());
        let pages = FeedPages::new(fake_api(1000, &calls), 100, Duration::ZERO, Some(130));
        assert_eq!(pages.count(), 130);
        assert_eq!(*calls.borrow(), vec![(0, 100), (100, 30)]);
    }

    #[test]
    fn lazy_until_consumed() {
        let calls = std::cell::RefCell::new(Vec::new());
        let mut pages = FeedPages::new(fake_api(1000, &calls), 10, Duration::ZERO, None);
        assert!(calls.borrow().is_empty());
        pages.next().unwrap().unwrap();
        assert_eq!(calls.borrow().len(), 1);
        for _ in 0..9 {
            pages.next().unwrap().unwrap();
        }
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn empty_result_set() {
        let calls = std::cell::RefCell::new(Vec::new());
        let mut pages = FeedPages::new(fake_api(0, &calls), 100, Duration::ZERO, None);
        assert!(pages.next().is_none());
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn skipped_entries_still_advance_offset() {
        let mut calls = Vec::new();
        let pages = FeedPages::new(
            |start, max| {
                calls.push(start);
                // First page: 2 entries, one unusable
                Ok(match start {
                    0 => AtomPage {
                        total_results: Some(3),
                        entries: 2,
                        papers: vec![paper(0)],
                        api_error: None,
                    },
                    _ => AtomPage {
                        total_results: Some(3),
                        entries: 1.min(max),
                        papers: vec![paper(2)],
                        api_error: None,
                    },
                })
            },
            2,
            Duration::ZERO,
            None,
        );
        let ids: Vec<String> = pages.map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec!["2503.00000", "2503.00002"]);
        assert_eq!(calls, vec![0, 2]);
    }

    #[test]
    fn error_yielded_once_then_stops() {
        let mut pages = FeedPages::new(
            |_, _| Err(CollaboratorError::transient("503")),
            100,
            Duration::ZERO,
            None,
        );
        assert!(pages.next().unwrap().is_err());
        assert!(pages.next().is_none());
    }
}
