//! Nyaa/Sukebei item page with the full comment thread.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::{absolute_url, all_digits};
use crate::models::{Comment, CommentUser, ItemId, SourceKind, UserRole};
use crate::scrapers::{ItemComments, ParseError, ParsedPage, ScrapedItem};
use crate::utils::{element_text, html_to_markdown};

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3.panel-title").unwrap());
static PANELS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.comment-panel").unwrap());
static USER_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/user/']").unwrap());
static AVATAR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img.avatar").unwrap());
static TIMESTAMP: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-timestamp]").unwrap());
static CONTENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.comment-content").unwrap());
static DETAIL_LABEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.col-md-1").unwrap());

#[derive(Debug, Clone)]
pub struct ItemPageParser {
    source: SourceKind,
    item_id: u64,
}

impl ItemPageParser {
    pub fn new(source: SourceKind, item_id: u64) -> Self {
        Self { source, item_id }
    }

    /// Parse the item page into a single item carrying its whole thread.
    ///
    /// A page with neither a title nor comment panels is not an item page.
    pub fn parse(&self, raw: &str) -> Result<ParsedPage, ParseError> {
        let doc = Html::parse_document(raw);
        let title = doc
            .select(&TITLE)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
        let panels: Vec<ElementRef<'_>> = doc.select(&PANELS).collect();

        if title.is_none() && panels.is_empty() {
            return Err(ParseError::MissingElement("torrent title"));
        }

        let submitter = find_submitter(&doc);
        let mut page = ParsedPage {
            entries: 1,
            ..Default::default()
        };
        let mut comments = Vec::with_capacity(panels.len());

        for (index, panel) in panels.into_iter().enumerate() {
            match self.parse_comment(panel, index as u32 + 1, submitter.as_deref()) {
                Ok(comment) => comments.push(comment),
                Err(e) => {
                    warn!("Skipping comment {} on {} item {}: {}", index + 1, self.source, self.item_id, e);
                    page.skipped += 1;
                }
            }
        }
        comments.sort_by_key(|c: &Comment| (c.timestamp, c.pos));

        debug!("{} item {}: {} comments", self.source, self.item_id, comments.len());
        page.items.push(ScrapedItem {
            id: ItemId::Numeric(self.item_id),
            link_key: self.item_id.to_string(),
            title,
            comments: ItemComments::Thread(comments),
        });
        Ok(page)
    }

    fn parse_comment(
        &self,
        panel: ElementRef<'_>,
        pos: u32,
        submitter: Option<&str>,
    ) -> Result<Comment, ParseError> {
        let content = panel
            .select(&CONTENT)
            .next()
            .ok_or(ParseError::MissingElement("comment content"))?;
        let raw_id = content
            .value()
            .attr("id")
            .ok_or(ParseError::MissingElement("comment id"))?;
        let id = all_digits(raw_id).ok_or_else(|| ParseError::InvalidValue {
            field: "comment id",
            value: raw_id.to_string(),
        })?;

        let raw_ts = panel
            .select(&TIMESTAMP)
            .next()
            .and_then(|el| el.value().attr("data-timestamp"))
            .ok_or(ParseError::MissingElement("comment timestamp"))?;
        let timestamp = raw_ts.trim().parse::<i64>().map_err(|_| ParseError::InvalidValue {
            field: "comment timestamp",
            value: raw_ts.to_string(),
        })?;

        let image = panel
            .select(&AVATAR)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| absolute_url(self.source.site_base(), src));

        let user = match panel.select(&USER_LINK).next() {
            Some(link) => {
                let username = element_text(link);
                let role = detect_role(link, &username, submitter);
                CommentUser::new(username).with_image(image).with_role(role)
            }
            None => CommentUser::anonymous().with_image(image),
        };

        Ok(Comment::new(id, pos, timestamp, user, html_to_markdown(content)))
    }
}

fn detect_role(link: ElementRef<'_>, username: &str, submitter: Option<&str>) -> UserRole {
    if link.value().attr("title") == Some("Trusted") {
        return UserRole::Trusted;
    }

    let header_says_uploader = link
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "p")
        .is_some_and(|p| p.text().collect::<String>().contains("(uploader)"));

    if header_says_uploader || submitter == Some(username) {
        UserRole::Uploader
    } else {
        UserRole::None
    }
}

/// Username from the "Submitter:" row of the torrent details, if it links to a user.
fn find_submitter(doc: &Html) -> Option<String> {
    doc.select(&DETAIL_LABEL)
        .find(|label| label.text().collect::<String>().contains("Submitter:"))
        .and_then(|label| label.next_siblings().find_map(ElementRef::wrap))
        .and_then(|value| value.select(&USER_LINK).next())
        .map(element_text)
}
