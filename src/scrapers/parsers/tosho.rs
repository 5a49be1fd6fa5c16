//! AnimeTosho comment feed.
//!
//! The feed lists recent comments across all items. Each entry links to its
//! item by a slug such as `show-01.n1234567`; the numeric suffix becomes the
//! item id. Positions are left at zero and assigned against stored history.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Days, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::models::{Comment, CommentUser, ItemId, ANONYMOUS};
use crate::scrapers::{ItemComments, ParseError, ParsedPage, ScrapedItem};
use crate::utils::{element_text, html_to_markdown};

static ENTRIES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.comment, div.comment2").unwrap());
static USER_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.comment_user").unwrap());
static VIEW_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/view/']").unwrap());
static STRONG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong").unwrap());
static BREAK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("br").unwrap());
static MESSAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.user_message_c").unwrap());
static PAGINATION_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.pagination a[href]").unwrap());
static PAGINATION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.pagination").unwrap());

static SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/view/([^#?]+)").unwrap());
static SLUG_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.n(\d+)$").unwrap());
static COMMENT_ANCHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#comment(\d+)").unwrap());
static PAGE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]page=(\d+)").unwrap());
static CLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2}):(\d{2})").unwrap());
static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{2,4})\s+(\d{1,2}):(\d{2})").unwrap()
});

#[derive(Debug, Clone, Default)]
pub struct ToshoParser;

struct Entry {
    item: ItemId,
    slug: String,
    title: Option<String>,
    comment: Comment,
}

impl ToshoParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one feed page, grouping comments by item in order of first appearance.
    pub fn parse(&self, raw: &str, now: DateTime<Utc>) -> ParsedPage {
        let doc = Html::parse_document(raw);
        let mut page = ParsedPage {
            max_page: max_page(&doc),
            ..Default::default()
        };
        let mut index: HashMap<ItemId, usize> = HashMap::new();

        for entry in doc.select(&ENTRIES) {
            page.entries += 1;
            let entry = match parse_entry(entry, now) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping feed entry: {}", e);
                    page.skipped += 1;
                    continue;
                }
            };

            let slot = *index.entry(entry.item.clone()).or_insert_with(|| {
                page.items.push(ScrapedItem {
                    id: entry.item.clone(),
                    link_key: entry.slug.clone(),
                    title: entry.title.clone(),
                    comments: ItemComments::Thread(Vec::new()),
                });
                page.items.len() - 1
            });
            if let ItemComments::Thread(comments) = &mut page.items[slot].comments {
                comments.push(entry.comment);
            }
        }

        page
    }
}

fn parse_entry(entry: ElementRef<'_>, now: DateTime<Utc>) -> Result<Entry, ParseError> {
    let block = entry
        .select(&USER_BLOCK)
        .next()
        .ok_or(ParseError::MissingElement("comment header"))?;
    let links: Vec<&str> = block
        .select(&VIEW_LINKS)
        .filter_map(|a| a.value().attr("href"))
        .collect();

    let slug = links
        .first()
        .and_then(|href| SLUG.captures(href))
        .map(|c| c[1].to_string())
        .ok_or(ParseError::MissingElement("item link"))?;
    let comment_id = links
        .iter()
        .find_map(|href| COMMENT_ANCHOR.captures(href))
        .and_then(|c| c[1].parse::<u64>().ok())
        .ok_or(ParseError::MissingElement("comment id"))?;

    // The second item link carries the title.
    let title = block
        .select(&VIEW_LINKS)
        .nth(1)
        .map(element_text)
        .filter(|t| !t.is_empty());

    let username = block
        .select(&STRONG)
        .next()
        .map(element_text)
        .map(|name| normalize_username(&name))
        .ok_or(ParseError::MissingElement("username"))?;

    let timestamp = time_label(block)
        .and_then(|label| parse_relative_time(&label, now))
        .unwrap_or_else(|| now.timestamp());

    let message = entry
        .select(&MESSAGE)
        .next()
        .map(html_to_markdown)
        .ok_or(ParseError::MissingElement("comment body"))?;

    Ok(Entry {
        item: item_id_from_slug(&slug),
        slug,
        title,
        comment: Comment::new(comment_id, 0, timestamp, CommentUser::new(username), message),
    })
}

/// Numeric suffix of an item slug, or the whole slug when there is none.
pub(crate) fn item_id_from_slug(slug: &str) -> ItemId {
    SLUG_NUMBER
        .captures(slug)
        .and_then(|c| c[1].parse::<u64>().ok())
        .map(ItemId::Numeric)
        .unwrap_or_else(|| ItemId::Slug(slug.to_string()))
}

/// `Anonymous: "nick"` becomes `Anonymous (nick)`.
fn normalize_username(raw: &str) -> String {
    if !raw.starts_with(ANONYMOUS) {
        return raw.to_string();
    }
    match raw.split_once(':') {
        Some((_, nick)) => {
            let nick = nick.trim().trim_matches('"').trim();
            if nick.is_empty() {
                ANONYMOUS.to_string()
            } else {
                format!("{} ({})", ANONYMOUS, nick)
            }
        }
        None => raw.to_string(),
    }
}

/// Text right after the first line break of the header, without the leading dash.
fn time_label(block: ElementRef<'_>) -> Option<String> {
    let br = block.select(&BREAK).next()?;
    let text: &str = br.next_sibling()?.value().as_text()?;
    let label = text.trim_start_matches(|c: char| c == '—' || c.is_whitespace()).trim();
    (!label.is_empty()).then(|| label.to_string())
}

/// Convert a feed date label to Unix seconds, in UTC.
///
/// `Today HH:MM` and `Yesterday HH:MM` are resolved against the date of `now`;
/// anything else must look like `dd/mm/yy HH:MM`.
pub fn parse_relative_time(label: &str, now: DateTime<Utc>) -> Option<i64> {
    let lower = label.to_ascii_lowercase();
    let days_back = if lower.contains("today") {
        Some(0)
    } else if lower.contains("yesterday") {
        Some(1)
    } else {
        None
    };

    if let Some(days_back) = days_back {
        let clock = CLOCK.captures(label)?;
        let date = now.date_naive().checked_sub_days(Days::new(days_back))?;
        let time = date.and_hms_opt(clock[1].parse().ok()?, clock[2].parse().ok()?, 0)?;
        return Some(time.and_utc().timestamp());
    }

    let caps = DATE_TIME.captures(label)?;
    let mut year: i32 = caps[3].parse().ok()?;
    if year < 100 {
        year += 2000;
    }
    let date = NaiveDate::from_ymd_opt(year, caps[2].parse().ok()?, caps[1].parse().ok()?)?;
    let time = date.and_hms_opt(caps[4].parse().ok()?, caps[5].parse().ok()?, 0)?;
    Some(time.and_utc().timestamp())
}

fn max_page(doc: &Html) -> Option<u32> {
    doc.select(&PAGINATION).next()?;
    let highest = doc
        .select(&PAGINATION_LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| PAGE_NUMBER.captures(href))
        .filter_map(|c| c[1].parse::<u32>().ok())
        .max()
        .unwrap_or(1);
    Some(highest.max(1))
}
