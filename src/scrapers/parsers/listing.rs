//! Nyaa/Sukebei search and user listings.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{all_digits, first_number};
use crate::models::{ItemId, SourceKind};
use crate::scrapers::{ItemComments, ParsedPage, ScrapedItem};

/// Rows per listing page on Nyaa and Sukebei.
pub const ITEMS_PER_PAGE: u32 = 75;

static ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr.default, tr.success").unwrap());
static COMMENT_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.comments").unwrap());
static VIEW_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/view/']").unwrap());
static PAGE_INFO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.pagination-page-info").unwrap());
static HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());

static RESULT_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out of (\d+) results").unwrap());
static HEADING_TOTAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\)").unwrap());

#[derive(Debug, Clone)]
pub struct ListingParser {
    source: SourceKind,
    user_page: bool,
}

impl ListingParser {
    pub fn new(source: SourceKind, user_page: bool) -> Self {
        Self { source, user_page }
    }

    pub fn parse(&self, raw: &str) -> ParsedPage {
        let doc = Html::parse_document(raw);
        let mut page = ParsedPage {
            max_page: self.max_page(&doc),
            ..Default::default()
        };

        for row in doc.select(&ROWS) {
            page.entries += 1;
            // Rows without a comment link have no comments.
            let Some(comment_link) = row.select(&COMMENT_LINK).next() else {
                continue;
            };
            match parse_row(row, comment_link) {
                Some(item) => page.items.push(item),
                None => page.skipped += 1,
            }
        }

        debug!(
            "{} listing: {} items with comments, {} skipped",
            self.source,
            page.items.len(),
            page.skipped
        );
        page
    }

    fn max_page(&self, doc: &Html) -> Option<u32> {
        let total: u32 = if self.user_page {
            let heading = doc.select(&HEADING).next()?.text().collect::<String>();
            HEADING_TOTAL.captures(&heading)?[1].parse().ok()?
        } else {
            let info = doc.select(&PAGE_INFO).next()?.text().collect::<String>();
            RESULT_TOTAL.captures(&info)?[1].parse().ok()?
        };
        Some(total.div_ceil(ITEMS_PER_PAGE).max(1))
    }
}

fn parse_row(row: ElementRef<'_>, comment_link: ElementRef<'_>) -> Option<ScrapedItem> {
    let count: usize = first_number(&comment_link.text().collect::<String>())?;

    let view = row
        .select(&VIEW_LINK)
        .find(|a| a.value().attr("href").is_some_and(|h| !h.contains('#')))?;
    let href = view.value().attr("href")?;
    let key = href.trim_end_matches('/').rsplit('/').next()?;
    let id = all_digits(key)?;

    let title = view
        .value()
        .attr("title")
        .map(str::to_string)
        .unwrap_or_else(|| view.text().collect::<String>())
        .trim()
        .to_string();

    Some(ScrapedItem {
        id: ItemId::Numeric(id),
        link_key: id.to_string(),
        title: (!title.is_empty()).then_some(title),
        comments: ItemComments::Count(count),
    })
}
