//! paperflow-arxiv: arXiv as a metadata source and content fetcher.
//!
//! Metadata comes from the Atom query API, paged and paced per arXiv's
//! usage rules; content is the PDF rendition of each paper.

mod config;
mod fetcher;
mod parser;
mod source;

pub use config::ArxivConfig;
pub use fetcher::ArxivFetcher;
pub use parser::{normalize_id, parse_feed, AtomPage};
pub use source::{query_url, ArxivSource, FeedPages};
