//! Fetching and parsing of comment pages.
//!
//! The [`Paginator`] drives a [`PageFetcher`] across the pages of a seed URL
//! and hands each page to the source's [`PageParser`].

pub mod cookies;
mod http_client;
pub mod pagination;
pub mod parsers;
pub mod rate_limiter;

pub use cookies::{load_cookie_jar, CookieSource};
pub use http_client::{resolve_user_agent, ClientOptions, HttpClient, RetryPolicy, USER_AGENT};
pub use pagination::{page_url, CrawlReport, PageBound, Paginator};
pub use parsers::{Clock, ItemPageParser, ListingParser, PageParser, ToshoParser};
pub use rate_limiter::{RateLimitConfig, RateLimiter};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Comment, ItemId};

/// Network or HTTP failure while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    Exhausted { url: String, attempts: u32, last: String },
}

impl FetchError {
    /// Transient failures worth another attempt: transport errors, 429 and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Client(_) | FetchError::Exhausted { .. } => false,
            FetchError::Request { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// A page or entry that did not have the expected structure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing {0}")]
    MissingElement(&'static str),
    #[error("Invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

/// Source of raw page content.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page body. Implementations apply their own bounded retry.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Comment information a parser found for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemComments {
    /// Listing rows only show a count; bodies live on the item page.
    Count(usize),
    /// The comments themselves, in thread order.
    Thread(Vec<Comment>),
}

impl ItemComments {
    pub fn count(&self) -> usize {
        match self {
            ItemComments::Count(n) => *n,
            ItemComments::Thread(comments) => comments.len(),
        }
    }
}

/// One item as seen on a parsed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedItem {
    pub id: ItemId,
    /// Key used in the item's URL: the slug for AnimeTosho, the id elsewhere.
    pub link_key: String,
    pub title: Option<String>,
    pub comments: ItemComments,
}

impl ScrapedItem {
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Torrent ID {}", self.id))
    }
}

/// Structured result of parsing one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    pub items: Vec<ScrapedItem>,
    /// Entries listed on the page, whether or not they carried comments.
    pub entries: usize,
    /// Highest page number advertised by the page's own pagination widget.
    pub max_page: Option<u32>,
    /// Entries that were present but could not be parsed.
    pub skipped: usize,
}

impl ParsedPage {
    /// A page that listed nothing at all marks the end of a crawl.
    pub fn is_empty(&self) -> bool {
        self.entries == 0 && self.items.is_empty()
    }
}
