//! Keyword filtering of item titles.

/// Case-insensitive substring match of `title` against any of `keywords`.
///
/// An empty keyword list matches every title.
pub fn matches<S: AsRef<str>>(title: &str, keywords: &[S]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let title = title.to_lowercase();
    keywords
        .iter()
        .any(|k| title.contains(&k.as_ref().to_lowercase()))
}

/// Pre-lowercased keyword set for repeated matching during a crawl.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn matches(&self, title: &str) -> bool {
        matches(title, &self.keywords)
    }
}
