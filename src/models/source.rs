//! Supported comment sources and their per-site conventions.

use std::fmt;

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use super::comment::Comment;

static VIEW_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/view/(\d+)").unwrap());

/// A site whose comments are monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Nyaa,
    Sukebei,
    AnimeTosho,
}

impl SourceKind {
    /// Detect the source from a seed URL. Unknown hosts are treated as Nyaa.
    pub fn detect(seed: &str) -> Self {
        let host = Url::parse(seed)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_else(|| seed.to_ascii_lowercase());

        if host.contains("animetosho.org") {
            SourceKind::AnimeTosho
        } else if host.contains("sukebei.nyaa.si") {
            SourceKind::Sukebei
        } else {
            SourceKind::Nyaa
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nyaa => "nyaa",
            Self::Sukebei => "sukebei",
            Self::AnimeTosho => "animetosho",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Nyaa => "Nyaa.si",
            Self::Sukebei => "Sukebei",
            Self::AnimeTosho => "AnimeTosho",
        }
    }

    /// File name of this source's store snapshot.
    pub fn store_file_name(&self) -> &'static str {
        match self {
            Self::Nyaa => "database.json",
            Self::Sukebei => "database.sukebei.json",
            Self::AnimeTosho => "database.at.json",
        }
    }

    pub fn site_base(&self) -> &'static str {
        match self {
            Self::Nyaa => "https://nyaa.si",
            Self::Sukebei => "https://sukebei.nyaa.si",
            Self::AnimeTosho => "https://animetosho.org",
        }
    }

    /// Query parameter the listing pages use for the page number.
    pub fn page_param(&self) -> &'static str {
        match self {
            Self::Nyaa | Self::Sukebei => "p",
            Self::AnimeTosho => "page",
        }
    }

    /// Whether freshly scraped comments only cover the latest part of a thread,
    /// so their positions must continue after what is already stored.
    pub fn has_partial_threads(&self) -> bool {
        matches!(self, Self::AnimeTosho)
    }

    pub fn embed_color(&self) -> u32 {
        match self {
            Self::Nyaa => 0x0085FF,
            Self::Sukebei => 0xA70000,
            Self::AnimeTosho => 0xFF6B00,
        }
    }

    pub fn webhook_username(&self) -> &'static str {
        match self {
            Self::Nyaa => "Nyaa Comments",
            Self::Sukebei => "Sukebei Comments",
            Self::AnimeTosho => "AnimeTosho Comments",
        }
    }

    /// Avatar for commenters without one of their own.
    pub fn default_avatar(&self) -> &'static str {
        match self {
            Self::Nyaa | Self::AnimeTosho => "https://nyaa.si/static/img/avatar/default.png",
            Self::Sukebei => "https://sukebei.nyaa.si/static/img/avatar/default.png",
        }
    }

    /// Avatar the webhook posts under.
    pub fn webhook_avatar(&self) -> &'static str {
        match self {
            Self::AnimeTosho => {
                "https://cdn.discordapp.com/icons/885689092417921094/680cbf15fa9847f797b8a05f0c24ae0f.png?size=4096"
            }
            _ => self.default_avatar(),
        }
    }

    /// Whether notifications show the commenter's avatar and profile link.
    pub fn shows_profiles(&self) -> bool {
        !matches!(self, Self::AnimeTosho)
    }

    /// URL of the item's own page. `link_key` is the slug for AnimeTosho and the
    /// numeric id for the other sources.
    pub fn item_url(&self, link_key: &str) -> String {
        format!("{}/view/{}", self.site_base(), link_key)
    }

    /// Permalink to one comment on its item page.
    pub fn comment_url(&self, link_key: &str, comment: &Comment) -> String {
        match self {
            Self::AnimeTosho if comment.id != 0 => {
                format!("{}#comment{}", self.item_url(link_key), comment.id)
            }
            Self::AnimeTosho => self.item_url(link_key),
            Self::Nyaa | Self::Sukebei => format!("{}#com-{}", self.item_url(link_key), comment.pos),
        }
    }

    /// Profile link for a commenter, when the source has public profiles.
    pub fn user_url(&self, username: &str) -> Option<String> {
        match self {
            Self::Nyaa | Self::Sukebei => Some(format!("{}/user/{}", self.site_base(), username)),
            Self::AnimeTosho => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// What the seed URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedTarget {
    /// A paginated listing (search results, user page, comment feed).
    Listing,
    /// One item's own page; pagination is bypassed.
    SingleItem(u64),
}

/// A seed URL resolved to its source and target kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub url: String,
    pub source: SourceKind,
    pub target: SeedTarget,
}

impl Seed {
    pub fn parse(url: &str) -> Self {
        let source = SourceKind::detect(url);
        let target = match source {
            SourceKind::Nyaa | SourceKind::Sukebei => VIEW_ID
                .captures(url)
                .and_then(|c| c[1].parse::<u64>().ok())
                .map(SeedTarget::SingleItem)
                .unwrap_or(SeedTarget::Listing),
            SourceKind::AnimeTosho => SeedTarget::Listing,
        };

        Self {
            url: url.to_string(),
            source,
            target,
        }
    }

    pub fn is_single_item(&self) -> bool {
        matches!(self.target, SeedTarget::SingleItem(_))
    }

    /// Whether the seed is a user page, whose result count lives in the heading.
    pub fn is_user_page(&self) -> bool {
        self.url.contains("/user/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommentUser;

    #[test]
    fn test_detect_sources() {
        assert_eq!(SourceKind::detect("https://nyaa.si/?q=ember"), SourceKind::Nyaa);
        assert_eq!(
            SourceKind::detect("https://sukebei.nyaa.si/user/foo"),
            SourceKind::Sukebei
        );
        assert_eq!(
            SourceKind::detect("https://animetosho.org/comments"),
            SourceKind::AnimeTosho
        );
    }

    #[test]
    fn test_store_file_per_source() {
        assert_eq!(SourceKind::Nyaa.store_file_name(), "database.json");
        assert_eq!(SourceKind::Sukebei.store_file_name(), "database.sukebei.json");
        assert_eq!(SourceKind::AnimeTosho.store_file_name(), "database.at.json");
    }

    #[test]
    fn test_single_item_seed() {
        let seed = Seed::parse("https://nyaa.si/view/2008634");
        assert_eq!(seed.target, SeedTarget::SingleItem(2008634));

        let listing = Seed::parse("https://nyaa.si/user/someone?q=x");
        assert_eq!(listing.target, SeedTarget::Listing);
        assert!(listing.is_user_page());
    }

    #[test]
    fn test_comment_urls() {
        let comment = Comment::new(55, 3, 0, CommentUser::new("a"), "m");
        assert_eq!(
            SourceKind::Nyaa.comment_url("42", &comment),
            "https://nyaa.si/view/42#com-3"
        );
        assert_eq!(
            SourceKind::AnimeTosho.comment_url("show.n42", &comment),
            "https://animetosho.org/view/show.n42#comment55"
        );
    }
}
