//! HTML text helpers for comment bodies.

use std::sync::LazyLock;

use htmd::options::{BrStyle, BulletListMarker, CodeBlockStyle, HeadingStyle, Options};
use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::ElementRef;
use tracing::debug;

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static TRAILING_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());
static LINK_LABEL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[https?://([^\]]*)\]").unwrap());

/// Concatenated, trimmed text content of an element.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn converter() -> HtmlToMarkdown {
    HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style"])
        .options(Options {
            heading_style: HeadingStyle::Atx,
            br_style: BrStyle::TwoSpaces,
            code_block_style: CodeBlockStyle::Fenced,
            bullet_list_marker: BulletListMarker::Dash,
            ..Default::default()
        })
        .build()
}

/// Convert an element's content to Markdown.
///
/// Falls back to the plain text when the markup cannot be converted. Bare
/// URLs used as link labels lose their scheme.
pub fn html_to_markdown(el: ElementRef<'_>) -> String {
    let markdown = match converter().convert(&el.inner_html()) {
        Ok(markdown) => markdown,
        Err(e) => {
            debug!("Markdown conversion failed, keeping text: {}", e);
            return element_text(el);
        }
    };
    let out = TRAILING_SPACES.replace_all(&markdown, "");
    let out = EXCESS_NEWLINES.replace_all(&out, "\n\n");
    let out = LINK_LABEL_SCHEME.replace_all(&out, "[$1]");
    out.trim().to_string()
}
