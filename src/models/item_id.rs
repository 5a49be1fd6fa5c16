//! Item identifiers with source-appropriate ordering.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of a monitored item (a torrent or release).
///
/// Numeric identifiers sort by value, slugs sort lexically, and all numeric
/// identifiers sort before any slug. Both are stored as plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemId {
    Numeric(u64),
    Slug(String),
}

impl ItemId {
    /// Parse an identifier, preferring the numeric form.
    ///
    /// Strings with leading zeros stay slugs so that they round-trip unchanged.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let canonical_digits = !raw.is_empty()
            && raw.bytes().all(|b| b.is_ascii_digit())
            && (raw == "0" || !raw.starts_with('0'));
        if canonical_digits {
            if let Ok(n) = raw.parse::<u64>() {
                return ItemId::Numeric(n);
            }
        }
        ItemId::Slug(raw.to_string())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Numeric(n) => write!(f, "{}", n),
            ItemId::Slug(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        ItemId::Numeric(n)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId::parse(s)
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ItemId::Numeric(a), ItemId::Numeric(b)) => a.cmp(b),
            (ItemId::Numeric(_), ItemId::Slug(_)) => Ordering::Less,
            (ItemId::Slug(_), ItemId::Numeric(_)) => Ordering::Greater,
            (ItemId::Slug(a), ItemId::Slug(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ItemId::parse(&raw))
    }
}
