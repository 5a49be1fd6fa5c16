//! Backup pipeline against in-memory upload host and webhooks.

mod common;

use std::sync::Arc;

use common::{webhook, MemoryHost, RecordingWebhook};
use nyaa_comments::backup::{restore, BackupError, BackupExpiry, BackupPipeline, ChannelConfig};
use nyaa_comments::crypto::SecretKey;
use nyaa_comments::models::{Comment, CommentUser, ItemId};
use nyaa_comments::storage::CommentStore;

fn store() -> CommentStore {
    let mut store = CommentStore::new();
    store.update(
        ItemId::Numeric(42),
        vec![Comment::new(1, 1, 100, CommentUser::new("alice"), "hello")],
    );
    store
}

#[tokio::test]
async fn key_goes_only_to_secret_channel() {
    let host = Arc::new(MemoryHost::default());
    let hook = Arc::new(RecordingWebhook::default());
    let channels = ChannelConfig {
        secret: Some(webhook("secret")),
        regular: Some(webhook("regular")),
        automated: true,
    };

    let receipt = BackupPipeline::new(host.clone(), hook.clone())
        .run(&store(), "database.json", BackupExpiry::H24, &channels)
        .await
        .unwrap();

    assert!(receipt.delivered_to_secret_channel);
    assert_eq!(receipt.archive_name, "database.json.encrypted.tar.gz");
    assert!(hook.posts_to(&webhook("regular")).is_empty());

    let secret_posts = hook.posts_to(&webhook("secret"));
    assert_eq!(secret_posts.len(), 1);
    let fields = &secret_posts[0].embeds[0].fields;
    assert_eq!(fields[0].value, receipt.url);
    let key = SecretKey::parse(fields[1].value.trim_matches('`')).unwrap();

    let archive = host.uploads.lock().unwrap()[0].1.clone();
    let restored = CommentStore::from_json_bytes(&restore(&archive, &key).unwrap()).unwrap();
    assert_eq!(restored, store());
}

#[tokio::test]
async fn automated_run_without_secret_channel_fails_closed() {
    let host = Arc::new(MemoryHost::default());
    let hook = Arc::new(RecordingWebhook::default());
    let channels = ChannelConfig {
        secret: None,
        regular: Some(webhook("regular")),
        automated: true,
    };

    let err = BackupPipeline::new(host.clone(), hook.clone())
        .run(&store(), "database.json", BackupExpiry::H1, &channels)
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::SecretChannelMissing(_)));
    assert!(host.uploads.lock().unwrap().is_empty());
    assert_eq!(hook.total(), 0);
}

#[tokio::test]
async fn wrong_key_restores_nothing() {
    let host = Arc::new(MemoryHost::default());
    let hook = Arc::new(RecordingWebhook::default());
    let channels = ChannelConfig {
        secret: Some(webhook("secret")),
        ..Default::default()
    };
    BackupPipeline::new(host.clone(), hook)
        .run(&store(), "database.json", BackupExpiry::H12, &channels)
        .await
        .unwrap();

    let archive = host.uploads.lock().unwrap()[0].1.clone();
    assert!(restore(&archive, &SecretKey::generate()).is_err());
}
