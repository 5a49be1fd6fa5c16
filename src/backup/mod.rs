//! Encrypted off-site backup of a comment store.
//!
//! A backup runs through fixed stages: check the delivery channel, serialize
//! the store, encrypt it with a fresh one-time key, pack the ciphertext into a
//! `.tar.gz`, upload it to an expiring host and hand the link and key to the
//! secret channel. The key exists only in memory for the duration of the run.

mod archive;
mod upload;

pub use archive::{pack, unpack_single};
pub use upload::{BackupUploader, Litterbox, UploadError, LITTERBOX_API};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::crypto::{self, CryptoError, SecretKey};
use crate::notify::{self, backup_payload, DeliveryOutcome, Webhook, WebhookTransport, DEFAULT_RETRY_BUDGET};
use crate::storage::CommentStore;

/// How long the upload host keeps a backup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackupExpiry {
    H1,
    #[default]
    H12,
    H24,
    H72,
}

impl BackupExpiry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H1 => "1h",
            Self::H12 => "12h",
            Self::H24 => "24h",
            Self::H72 => "72h",
        }
    }
}

impl FromStr for BackupExpiry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(Self::H1),
            "12h" => Ok(Self::H12),
            "24h" => Ok(Self::H24),
            "72h" => Ok(Self::H72),
            other => Err(format!("invalid expiry '{}': expected 1h, 12h, 24h or 72h", other)),
        }
    }
}

impl fmt::Display for BackupExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps of a backup run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    SelectingChannel,
    Serializing,
    Encrypting,
    Archiving,
    Uploading,
    Notifying,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SelectingChannel => "selecting channel",
            Self::Serializing => "serializing",
            Self::Encrypting => "encrypting",
            Self::Archiving => "archiving",
            Self::Uploading => "uploading",
            Self::Notifying => "notifying",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    Idle,
    Running(BackupStage),
    Done,
    Failed(BackupStage),
}

/// No channel may receive the backup key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretChannelMissingError {
    #[error("Backups from an automated run need a secret webhook (DISCORD_SECRET_WEBHOOK_URL); refusing to send the key elsewhere")]
    Automated,
    #[error("Backups need a webhook to deliver the download link and key")]
    NoWebhook,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    SecretChannelMissing(#[from] SecretChannelMissingError),
    #[error("Backup failed while {stage}: {source}")]
    Stage {
        stage: BackupStage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BackupError {
    fn at(stage: BackupStage, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        BackupError::Stage {
            stage,
            source: Box::new(source),
        }
    }

    pub fn stage(&self) -> BackupStage {
        match self {
            BackupError::SecretChannelMissing(_) => BackupStage::SelectingChannel,
            BackupError::Stage { stage, .. } => *stage,
        }
    }
}

/// Webhooks available to a run and whether it is automated.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    pub secret: Option<Webhook>,
    pub regular: Option<Webhook>,
    pub automated: bool,
}

/// Where the backup key will be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupChannel {
    Secret(Webhook),
    /// The regular webhook, only allowed outside automated runs.
    RegularFallback(Webhook),
}

impl BackupChannel {
    fn webhook(&self) -> &Webhook {
        match self {
            BackupChannel::Secret(w) | BackupChannel::RegularFallback(w) => w,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, BackupChannel::Secret(_))
    }
}

/// Choose the channel for the backup key. Automated runs without a secret
/// webhook fail closed.
pub fn resolve_backup_channel(config: &ChannelConfig) -> Result<BackupChannel, SecretChannelMissingError> {
    match (&config.secret, &config.regular, config.automated) {
        (Some(secret), _, _) => Ok(BackupChannel::Secret(secret.clone())),
        (None, _, true) => Err(SecretChannelMissingError::Automated),
        (None, Some(regular), false) => {
            warn!("No secret webhook configured; the backup key will be posted to the regular webhook");
            Ok(BackupChannel::RegularFallback(regular.clone()))
        }
        (None, None, false) => Err(SecretChannelMissingError::NoWebhook),
    }
}

/// What a finished backup can safely report. The key is not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReceipt {
    pub url: String,
    pub expiry: BackupExpiry,
    pub archive_name: String,
    pub delivered_to_secret_channel: bool,
}

pub struct BackupPipeline {
    uploader: Arc<dyn BackupUploader>,
    transport: Arc<dyn WebhookTransport>,
    retry_budget: u32,
    state: BackupState,
}

impl BackupPipeline {
    pub fn new(uploader: Arc<dyn BackupUploader>, transport: Arc<dyn WebhookTransport>) -> Self {
        Self {
            uploader,
            transport,
            retry_budget: DEFAULT_RETRY_BUDGET,
            state: BackupState::Idle,
        }
    }

    pub fn state(&self) -> BackupState {
        self.state
    }

    fn enter(&mut self, stage: BackupStage) {
        self.state = BackupState::Running(stage);
    }

    /// Run every stage for `store`, whose snapshot file is named `store_name`.
    pub async fn run(
        &mut self,
        store: &CommentStore,
        store_name: &str,
        expiry: BackupExpiry,
        channels: &ChannelConfig,
    ) -> Result<BackupReceipt, BackupError> {
        let result = self.run_stages(store, store_name, expiry, channels).await;
        self.state = match &result {
            Ok(_) => BackupState::Done,
            Err(e) => BackupState::Failed(e.stage()),
        };
        result
    }

    async fn run_stages(
        &mut self,
        store: &CommentStore,
        store_name: &str,
        expiry: BackupExpiry,
        channels: &ChannelConfig,
    ) -> Result<BackupReceipt, BackupError> {
        self.enter(BackupStage::SelectingChannel);
        let channel = resolve_backup_channel(channels)?;

        self.enter(BackupStage::Serializing);
        let snapshot = store
            .to_json_bytes()
            .map_err(|e| BackupError::at(BackupStage::Serializing, e))?;

        self.enter(BackupStage::Encrypting);
        let key = SecretKey::generate();
        let ciphertext = crypto::encrypt(&snapshot, &key).map_err(|e| BackupError::at(BackupStage::Encrypting, e))?;

        self.enter(BackupStage::Archiving);
        let archive_name = format!("{}.encrypted.tar.gz", store_name);
        let archive = pack(&format!("{}.encrypted", store_name), &ciphertext)
            .map_err(|e| BackupError::at(BackupStage::Archiving, e))?;

        self.enter(BackupStage::Uploading);
        info!("Uploading {} ({} bytes, expiry {})", archive_name, archive.len(), expiry);
        let url = self
            .uploader
            .upload(&archive_name, archive, expiry)
            .await
            .map_err(|e| BackupError::at(BackupStage::Uploading, e))?;

        self.enter(BackupStage::Notifying);
        let payload = backup_payload(&url, &key, expiry.as_str());
        match notify::deliver(self.transport.as_ref(), channel.webhook(), &payload, self.retry_budget).await {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::Failed(e) => return Err(BackupError::at(BackupStage::Notifying, e)),
            DeliveryOutcome::RateLimited { .. } => {
                return Err(BackupError::at(
                    BackupStage::Notifying,
                    notify::NotifyError::RateLimited(self.retry_budget),
                ))
            }
        }

        info!("Backup delivered");
        Ok(BackupReceipt {
            url,
            expiry,
            archive_name,
            delivered_to_secret_channel: channel.is_secret(),
        })
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Could not read backup archive: {0}")]
    Archive(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("Decrypted data is not a comment store: {0}")]
    InvalidStore(#[from] serde_json::Error),
}

/// Recover the store JSON from a backup archive.
///
/// The result is checked to be a valid store before it is returned.
pub fn restore(archive: &[u8], key: &SecretKey) -> Result<Vec<u8>, RestoreError> {
    let (_, ciphertext) = unpack_single(archive)?;
    let plain = crypto::decrypt(&ciphertext, key)?;
    CommentStore::from_json_bytes(&plain)?;
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, CommentUser, ItemId};
    use crate::notify::testing::ScriptedTransport;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        uploads: Mutex<Vec<(String, Vec<u8>, BackupExpiry)>>,
        reject: bool,
    }

    #[async_trait]
    impl BackupUploader for RecordingUploader {
        async fn upload(&self, file_name: &str, data: Vec<u8>, expiry: BackupExpiry) -> Result<String, UploadError> {
            if self.reject {
                return Err(UploadError::Rejected("nope".into()));
            }
            self.uploads.lock().unwrap().push((file_name.to_string(), data, expiry));
            Ok("https://litter.catbox.moe/abc.tar.gz".to_string())
        }
    }

    fn store() -> CommentStore {
        let mut store = CommentStore::new();
        store.update(
            ItemId::parse("42"),
            vec![Comment::new(1, 1, 100, CommentUser::new("a"), "hello")],
        );
        store
    }

    fn hook(name: &str) -> Webhook {
        Webhook::new(format!("https://discord.com/api/webhooks/{}", name)).unwrap()
    }

    #[test]
    fn test_channel_resolution() {
        let both = ChannelConfig {
            secret: Some(hook("secret")),
            regular: Some(hook("regular")),
            automated: true,
        };
        assert_eq!(resolve_backup_channel(&both), Ok(BackupChannel::Secret(hook("secret"))));

        let regular_only = ChannelConfig {
            secret: None,
            regular: Some(hook("regular")),
            automated: false,
        };
        assert_eq!(
            resolve_backup_channel(&regular_only),
            Ok(BackupChannel::RegularFallback(hook("regular")))
        );

        let automated = ChannelConfig {
            automated: true,
            ..regular_only
        };
        assert_eq!(resolve_backup_channel(&automated), Err(SecretChannelMissingError::Automated));
        assert_eq!(
            resolve_backup_channel(&ChannelConfig::default()),
            Err(SecretChannelMissingError::NoWebhook)
        );
    }

    #[tokio::test]
    async fn test_fail_closed_before_any_work() {
        let uploader = Arc::new(RecordingUploader::default());
        let transport = Arc::new(ScriptedTransport::default());
        let mut pipeline = BackupPipeline::new(uploader.clone(), transport.clone());

        let channels = ChannelConfig {
            secret: None,
            regular: Some(hook("regular")),
            automated: true,
        };
        let err = pipeline
            .run(&store(), "database.json", BackupExpiry::H12, &channels)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::SecretChannelMissing(SecretChannelMissingError::Automated)));
        assert_eq!(pipeline.state(), BackupState::Failed(BackupStage::SelectingChannel));
        assert!(uploader.uploads.lock().unwrap().is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_full_run_delivers_key_to_secret_channel_only() {
        let uploader = Arc::new(RecordingUploader::default());
        let transport = Arc::new(ScriptedTransport::default());
        let mut pipeline = BackupPipeline::new(uploader.clone(), transport.clone());
        let channels = ChannelConfig {
            secret: Some(hook("secret")),
            regular: Some(hook("regular")),
            automated: true,
        };

        let receipt = pipeline
            .run(&store(), "database.at.json", BackupExpiry::H72, &channels)
            .await
            .unwrap();
        assert_eq!(pipeline.state(), BackupState::Done);
        assert_eq!(receipt.archive_name, "database.at.json.encrypted.tar.gz");
        assert!(receipt.delivered_to_secret_channel);

        let posted = transport.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].0.ends_with("/secret"));

        // The key in the handoff restores the uploaded archive.
        let key_field = &posted[0].1.embeds[0].fields[1].value;
        let key = SecretKey::parse(key_field.trim_matches('`')).unwrap();
        let uploads = uploader.uploads.lock().unwrap();
        assert_eq!(uploads[0].2, BackupExpiry::H72);
        let restored = restore(&uploads[0].1, &key).unwrap();
        assert_eq!(CommentStore::from_json_bytes(&restored).unwrap(), store());
    }

    #[tokio::test]
    async fn test_upload_failure_stops_before_notifying() {
        let uploader = Arc::new(RecordingUploader {
            reject: true,
            ..Default::default()
        });
        let transport = Arc::new(ScriptedTransport::default());
        let mut pipeline = BackupPipeline::new(uploader, transport.clone());
        let channels = ChannelConfig {
            secret: Some(hook("secret")),
            ..Default::default()
        };

        let err = pipeline
            .run(&store(), "database.json", BackupExpiry::H1, &channels)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), BackupStage::Uploading);
        assert_eq!(pipeline.state(), BackupState::Failed(BackupStage::Uploading));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_restore_with_wrong_key_fails() {
        let key = SecretKey::generate();
        let token = crypto::encrypt(&store().to_json_bytes().unwrap(), &key).unwrap();
        let archive = pack("database.json.encrypted", &token).unwrap();

        assert!(matches!(
            restore(&archive, &SecretKey::generate()),
            Err(RestoreError::Crypto(CryptoError::Decrypt))
        ));
        assert!(restore(&archive, &key).is_ok());
    }

    #[test]
    fn test_expiry_parsing() {
        assert_eq!("24H".parse::<BackupExpiry>().unwrap(), BackupExpiry::H24);
        assert!("2d".parse::<BackupExpiry>().is_err());
        assert_eq!(BackupExpiry::default().to_string(), "12h");
    }
}
