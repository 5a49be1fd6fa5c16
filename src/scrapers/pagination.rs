//! Page-by-page crawling of a seed URL.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use super::{Clock, FetchError, PageFetcher, PageParser, ParsedPage};
use crate::models::{Seed, SourceKind};

/// How many pages a crawl may fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBound {
    Unlimited,
    Max(u32),
    /// Use the page count advertised on the first page, unlimited if none.
    Auto,
}

impl PageBound {
    pub fn default_for(source: SourceKind) -> Self {
        match source {
            SourceKind::Nyaa | SourceKind::Sukebei => PageBound::Auto,
            SourceKind::AnimeTosho => PageBound::Max(5),
        }
    }
}

impl FromStr for PageBound {
    type Err = String;

    /// `0` and `auto` select [`PageBound::Auto`]; `unlimited` removes the bound.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "0" => Ok(PageBound::Auto),
            "unlimited" | "all" => Ok(PageBound::Unlimited),
            n => n
                .parse::<u32>()
                .map(PageBound::Max)
                .map_err(|_| format!("invalid page bound '{}': expected a number, 'auto' or 'unlimited'", s)),
        }
    }
}

impl fmt::Display for PageBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageBound::Unlimited => f.write_str("unlimited"),
            PageBound::Max(n) => write!(f, "{}", n),
            PageBound::Auto => f.write_str("auto"),
        }
    }
}

/// URL of page `page` of a listing, replacing any page parameter already present.
pub fn page_url(seed: &str, param: &str, page: u32) -> String {
    let Ok(mut url) = Url::parse(seed) else {
        let sep = if seed.contains('?') { '&' } else { '?' };
        return format!("{}{}{}={}", seed, sep, param, page);
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &page.to_string());
    url.to_string()
}

/// Outcome of a whole crawl.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub pages: Vec<ParsedPage>,
    pub pages_fetched: u32,
    /// The fetch failure that ended the crawl early, if any.
    pub aborted: Option<FetchError>,
}

/// Lazily walks the pages of one seed.
///
/// Stops at the first page that lists nothing, when the bound is reached, or
/// on the first fetch failure. A crawl cannot be resumed; a new one starts at
/// page 1.
pub struct Paginator<'a> {
    fetcher: &'a dyn PageFetcher,
    parser: PageParser,
    clock: Clock,
    seed: Seed,
    bound: PageBound,
    /// Resolved page limit; `None` until the first page is seen under `Auto`.
    limit: Option<u32>,
    next_page: u32,
    finished: bool,
    pages_fetched: u32,
    aborted: Option<FetchError>,
}

impl<'a> Paginator<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, seed: Seed, bound: PageBound) -> Self {
        let parser = PageParser::for_seed(&seed);
        let limit = if parser.paginates() {
            match bound {
                PageBound::Max(n) => Some(n),
                PageBound::Unlimited | PageBound::Auto => None,
            }
        } else {
            Some(1)
        };
        Self {
            fetcher,
            parser,
            clock: Utc::now,
            seed,
            bound,
            limit,
            next_page: 1,
            finished: false,
            pages_fetched: 0,
            aborted: None,
        }
    }

    /// Anchor relative dates to `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn parser(&self) -> &PageParser {
        &self.parser
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    fn current_url(&self) -> String {
        if self.parser.paginates() {
            page_url(&self.seed.url, self.seed.source.page_param(), self.next_page)
        } else {
            self.seed.url.clone()
        }
    }

    /// Fetch and parse the next page, or `None` when the crawl is over.
    pub async fn next(&mut self) -> Option<ParsedPage> {
        loop {
            if self.finished || self.limit.is_some_and(|limit| self.next_page > limit) {
                self.finished = true;
                return None;
            }

            let url = self.current_url();
            debug!("Fetching page {} of {}", self.next_page, self.seed.source);
            let raw = match self.fetcher.fetch(&url).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Stopping crawl at page {}: {}", self.next_page, e);
                    self.aborted = Some(e);
                    self.finished = true;
                    return None;
                }
            };
            self.pages_fetched += 1;
            let page_number = self.next_page;
            self.next_page += 1;

            let page = match self.parser.parse(&raw, (self.clock)()) {
                Ok(page) => page,
                Err(e) => {
                    warn!("Could not parse page {}: {}", page_number, e);
                    continue;
                }
            };

            if page_number == 1 {
                self.resolve_limit(page.max_page);
            }

            if page.is_empty() {
                debug!("Page {} lists nothing, stopping", page_number);
                self.finished = true;
                return None;
            }
            return Some(page);
        }
    }

    /// Narrow the limit with the page count the site advertises.
    fn resolve_limit(&mut self, advertised: Option<u32>) {
        if !self.parser.paginates() {
            return;
        }
        self.limit = match (self.bound, advertised) {
            (PageBound::Auto, Some(max)) => Some(max),
            (PageBound::Max(n), Some(max)) => Some(n.min(max)),
            (_, _) => self.limit,
        };
        match self.limit {
            Some(limit) => info!("Crawling up to {} pages (bound: {})", limit, self.bound),
            None => info!("Crawling until an empty page (bound: {})", self.bound),
        }
    }

    /// Drive the crawl to completion.
    pub async fn run(mut self) -> CrawlReport {
        let mut pages = Vec::new();
        while let Some(page) = self.next().await {
            pages.push(page);
        }
        CrawlReport {
            pages,
            pages_fetched: self.pages_fetched,
            aborted: self.aborted,
        }
    }
}
