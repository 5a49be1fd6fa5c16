//! Comparison of freshly scraped comments against stored history.
//!
//! Comments are matched by their source-assigned id within one item. Nothing
//! here touches the network or the filesystem.

use std::collections::{HashMap, HashSet};

use crate::models::{Comment, ItemId};

/// How newly seen comments are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiffMode {
    /// Report new comments for notification.
    #[default]
    Notify,
    /// First-run suppression: persist everything, report nothing.
    Initialize,
}

/// Result of reconciling one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDiff {
    /// Comments to report, ascending by position.
    pub new: Vec<Comment>,
    /// History to persist: stored plus fresh, deduplicated by id, ordered by position.
    pub merged: Vec<Comment>,
    /// Whether `merged` differs from what was stored.
    pub changed: bool,
}

/// Comments in `fresh` whose id does not appear in `stored`, ordered by position.
///
/// Returns nothing in [`DiffMode::Initialize`].
pub fn diff(_item: &ItemId, fresh: &[Comment], stored: &[Comment], mode: DiffMode) -> Vec<Comment> {
    if mode == DiffMode::Initialize {
        return Vec::new();
    }

    let known: HashSet<u64> = stored.iter().map(|c| c.id).collect();
    let mut seen = HashSet::new();
    let mut new: Vec<Comment> = fresh
        .iter()
        .filter(|c| !known.contains(&c.id) && seen.insert(c.id))
        .cloned()
        .collect();
    new.sort_by_key(|c| c.pos);
    new
}

/// Union of stored and fresh comments, deduplicated by id, sorted by position.
///
/// Stored entries win over fresh ones with the same id, so history never shrinks
/// or changes under remote edits.
pub fn merge(stored: &[Comment], fresh: &[Comment]) -> Vec<Comment> {
    let mut ids = HashSet::with_capacity(stored.len() + fresh.len());
    let mut merged: Vec<Comment> = stored
        .iter()
        .chain(fresh.iter())
        .filter(|c| ids.insert(c.id))
        .cloned()
        .collect();
    merged.sort_by_key(|c| c.pos);
    merged
}

/// Diff and merge in one step.
pub fn reconcile(item: &ItemId, fresh: &[Comment], stored: &[Comment], mode: DiffMode) -> ItemDiff {
    let new = diff(item, fresh, stored, mode);
    let merged = merge(stored, fresh);
    let changed = merged.len() != stored.len();
    ItemDiff { new, merged, changed }
}

/// Give positions to fresh comments from a source that only shows the tail of
/// each thread.
///
/// Comments already stored keep their stored position. Unknown comments are
/// ordered by timestamp, then id, and numbered after the highest stored position.
pub fn assign_tail_positions(fresh: &mut [Comment], stored: &[Comment]) {
    let mut known: HashMap<u64, u32> = stored.iter().map(|c| (c.id, c.pos)).collect();
    let mut next = stored.iter().map(|c| c.pos).max().unwrap_or(0);

    fresh.sort_by_key(|c| (c.timestamp, c.id));
    for comment in fresh.iter_mut() {
        comment.pos = *known.entry(comment.id).or_insert_with(|| {
            next += 1;
            next
        });
    }
}
