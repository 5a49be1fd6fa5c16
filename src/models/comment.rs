//! Comment records as persisted in the store.

use serde::{Deserialize, Serialize};

/// Display name used for comments posted without an account.
pub const ANONYMOUS: &str = "Anonymous";

/// Role badge shown next to a commenter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    None,
    Trusted,
    Uploader,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Trusted => "trusted",
            Self::Uploader => "uploader",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// The user who posted a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentUser {
    pub username: String,
    /// Absolute avatar URL, when the source shows one.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "UserRole::is_none")]
    pub role: UserRole,
}

impl CommentUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            image: None,
            role: UserRole::None,
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS)
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.username == ANONYMOUS || self.username.starts_with("Anonymous (")
    }

    /// Username decorated with the role badge, e.g. `alice (trusted)`.
    pub fn display_name(&self) -> String {
        match self.role {
            UserRole::None => self.username.clone(),
            role => format!("{} ({})", self.username, role.as_str()),
        }
    }
}

/// A single comment within an item's thread.
///
/// `id` is assigned by the source and unique within its item only. `pos` is the
/// 1-based place of the comment in the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub pos: u32,
    /// Unix epoch seconds.
    pub timestamp: i64,
    pub user: CommentUser,
    pub message: String,
}

impl Comment {
    pub fn new(id: u64, pos: u32, timestamp: i64, user: CommentUser, message: impl Into<String>) -> Self {
        Self {
            id,
            pos,
            timestamp,
            user,
            message: message.into(),
        }
    }
}
