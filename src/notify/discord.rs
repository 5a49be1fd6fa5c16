//! Discord webhook message layout.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CommentEvent;
use crate::crypto::SecretKey;
use crate::utils::truncate_chars;

const MAX_TITLE: usize = 256;
const MAX_DESCRIPTION: usize = 4096;
const BACKUP_COLOR: u32 = 0x00FF00;
const BACKUP_USERNAME: &str = "Database Backup";
const BACKUP_AVATAR: &str = "https://nyaa.si/static/img/avatar/default.png";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
    pub username: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

fn iso_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// One embed announcing a new comment.
pub fn comment_payload(event: &CommentEvent) -> WebhookPayload {
    let source = event.source;
    let comment = &event.comment;
    let link = source.comment_url(&event.link_key, comment);

    let avatar = source.shows_profiles().then(|| {
        comment
            .user
            .image
            .clone()
            .unwrap_or_else(|| source.default_avatar().to_string())
    });
    let author_url = source
        .user_url(&comment.user.username)
        .filter(|_| !comment.user.is_anonymous())
        .unwrap_or_else(|| link.clone());

    let title = format!("New Comment on: {}", event.title);
    let embed = Embed {
        title: truncate_chars(&title, MAX_TITLE).to_string(),
        url: Some(link),
        color: source.embed_color(),
        author: Some(EmbedAuthor {
            name: comment.user.display_name(),
            url: Some(author_url),
            icon_url: avatar.clone(),
        }),
        description: Some(truncate_chars(&comment.message, MAX_DESCRIPTION).to_string()),
        thumbnail: avatar.map(|url| EmbedImage { url }),
        fields: Vec::new(),
        timestamp: DateTime::<Utc>::from_timestamp(comment.timestamp, 0).map(iso_timestamp),
    };

    WebhookPayload {
        embeds: vec![embed],
        username: source.webhook_username().to_string(),
        avatar_url: source.webhook_avatar().to_string(),
    }
}

/// The backup handoff. Carries the decryption key, so it must only ever be
/// posted to the secret channel.
pub fn backup_payload(download_url: &str, key: &SecretKey, expiry: &str) -> WebhookPayload {
    let field = |name: &str, value: String, inline: bool| EmbedField {
        name: name.to_string(),
        value,
        inline,
    };
    let embed = Embed {
        title: "Database Backup Uploaded".to_string(),
        color: BACKUP_COLOR,
        description: Some("Encrypted database backup has been uploaded to Catbox Litterbox.".to_string()),
        fields: vec![
            field("Download URL", download_url.to_string(), false),
            field("Decryption Key", format!("```{}```", key.expose()), false),
            field("Expiry", expiry.to_string(), true),
        ],
        timestamp: Some(iso_timestamp(Utc::now())),
        ..Default::default()
    };

    WebhookPayload {
        embeds: vec![embed],
        username: BACKUP_USERNAME.to_string(),
        avatar_url: BACKUP_AVATAR.to_string(),
    }
}
