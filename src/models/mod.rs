//! Data models for items, comments and sources.

mod comment;
mod item_id;
mod source;

pub use comment::{Comment, CommentUser, UserRole, ANONYMOUS};
pub use item_id::ItemId;
pub use source::{Seed, SeedTarget, SourceKind};
