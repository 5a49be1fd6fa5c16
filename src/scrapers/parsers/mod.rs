//! Page parsers, one per source variant.
//!
//! The variant is chosen once from the seed URL; every variant turns a raw page
//! into a [`ParsedPage`] of items plus the page's own pagination hint.

mod item;
mod listing;
mod tosho;

pub use item::ItemPageParser;
pub use listing::ListingParser;
pub use tosho::{parse_relative_time, ToshoParser};

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use url::Url;

use super::{ParseError, ParsedPage};
use crate::models::{Seed, SeedTarget, SourceKind};

/// Source of the current time that relative dates are anchored to.
pub type Clock = fn() -> DateTime<Utc>;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Parser for the kind of page a seed URL points at.
#[derive(Debug, Clone)]
pub enum PageParser {
    /// Nyaa/Sukebei listing: item ids, titles and comment counts.
    Listing(ListingParser),
    /// Nyaa/Sukebei item page: the full thread of one item.
    SingleItem(ItemPageParser),
    /// AnimeTosho comment feed: individual comments tagged with their item.
    Alternate(ToshoParser),
}

impl PageParser {
    pub fn for_seed(seed: &Seed) -> Self {
        match (seed.source, &seed.target) {
            (SourceKind::AnimeTosho, _) => PageParser::Alternate(ToshoParser::new()),
            (source, SeedTarget::SingleItem(id)) => {
                PageParser::SingleItem(ItemPageParser::new(source, *id))
            }
            (source, SeedTarget::Listing) => {
                PageParser::Listing(ListingParser::new(source, seed.is_user_page()))
            }
        }
    }

    /// Parse one page. Relative dates are anchored to `now`.
    pub fn parse(&self, raw: &str, now: DateTime<Utc>) -> Result<ParsedPage, ParseError> {
        match self {
            PageParser::Listing(p) => Ok(p.parse(raw)),
            PageParser::SingleItem(p) => p.parse(raw),
            PageParser::Alternate(p) => Ok(p.parse(raw, now)),
        }
    }

    /// Single item pages are fetched once, without pagination.
    pub fn paginates(&self) -> bool {
        !matches!(self, PageParser::SingleItem(_))
    }
}

/// First run of digits in `s`, e.g. the count in `"12 comments"`.
pub(crate) fn first_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    DIGITS.find(s).and_then(|m| m.as_str().parse().ok())
}

/// All digits of `s` concatenated, e.g. the id in `"torrent-comment12345"`.
pub(crate) fn all_digits(s: &str) -> Option<u64> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Resolve a possibly relative link against the site base.
pub(crate) fn absolute_url(base: &str, href: &str) -> Option<String> {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemId;
    use crate::scrapers::ItemComments;
    use chrono::TimeZone;

    #[test]
    fn test_variant_selection() {
        assert!(matches!(
            PageParser::for_seed(&Seed::parse("https://nyaa.si/?q=ember")),
            PageParser::Listing(_)
        ));
        assert!(matches!(
            PageParser::for_seed(&Seed::parse("https://sukebei.nyaa.si/view/99")),
            PageParser::SingleItem(_)
        ));
        assert!(matches!(
            PageParser::for_seed(&Seed::parse("https://animetosho.org/comments")),
            PageParser::Alternate(_)
        ));
    }

    #[test]
    fn test_number_helpers() {
        assert_eq!(first_number::<usize>(" 12 comments"), Some(12));
        assert_eq!(all_digits("torrent-comment12345"), Some(12345));
        assert_eq!(all_digits("none"), None);
        assert_eq!(
            absolute_url("https://nyaa.si", "/static/a.png").as_deref(),
            Some("https://nyaa.si/static/a.png")
        );
    }

    #[test]
    fn test_feed_dates_just_after_midnight() {
        let feed = r##"<html><body>
            <div class="comment"><div class="comment_user"><a href="/view/show.n77#comment901">Comment</a> by <strong>alice</strong> on <a href="/view/show.n77">Show</a><br> Yesterday 23:59</div><div class="user_message_c">late</div></div>
            <div class="comment2"><div class="comment_user"><a href="/view/show.n77#comment902">Comment</a> by <strong>bob</strong> on <a href="/view/show.n77">Show</a><br> Today 00:01</div><div class="user_message_c">early</div></div>
            </body></html>"##;
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 2, 0).unwrap();
        let parser = PageParser::for_seed(&Seed::parse("https://animetosho.org/comments"));

        let page = parser.parse(feed, now).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, ItemId::Numeric(77));
        let ItemComments::Thread(comments) = &page.items[0].comments else {
            panic!("expected thread");
        };
        let stamps: Vec<(u64, i64)> = comments.iter().map(|c| (c.id, c.timestamp)).collect();
        assert_eq!(
            stamps,
            vec![
                (901, Utc.with_ymd_and_hms(2025, 2, 28, 23, 59, 0).unwrap().timestamp()),
                (902, Utc.with_ymd_and_hms(2025, 3, 1, 0, 1, 0).unwrap().timestamp()),
            ]
        );
    }
}
