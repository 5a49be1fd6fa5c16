//! Run configuration and secrets, resolved once at startup.
//!
//! Secrets come from three layers: command-line flags, `.secrets.json` in the
//! working directory, then environment variables. The first layer that sets a
//! value wins. The resulting [`Secrets`] and [`RunConfig`] are passed into the
//! ingestion core, which never reads the environment itself.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::backup::{resolve_backup_channel, BackupExpiry, ChannelConfig, SecretChannelMissingError};
use crate::crypto::SecretKey;
use crate::models::Seed;
use crate::notify::Webhook;
use crate::scrapers::{CookieSource, PageBound};

pub const SECRETS_FILE: &str = ".secrets.json";

pub const ENV_WEBHOOK: &str = "DISCORD_WEBHOOK_URL";
pub const ENV_SECRET_WEBHOOK: &str = "DISCORD_SECRET_WEBHOOK_URL";
pub const ENV_COOKIES_URL: &str = "COOKIES_URL";
pub const ENV_COOKIES_PATH: &str = "COOKIES_PATH";
pub const ENV_COOKIES_KEY: &str = "COOKIES_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("The {0} is not a valid http(s) URL")]
    InvalidWebhook(&'static str),
    #[error("The cookies key is not a valid Fernet key")]
    InvalidCookiesKey,
    #[error("Discord webhook URL is not set. Provide it via --webhook, .secrets.json, or the DISCORD_WEBHOOK_URL environment variable")]
    MissingWebhook,
    #[error(transparent)]
    BackupChannel(#[from] SecretChannelMissingError),
}

/// Unvalidated secret values from one configuration layer.
#[derive(Clone, Default, Deserialize)]
pub struct SecretInputs {
    #[serde(default, rename = "discord_webhook_url")]
    pub webhook: Option<String>,
    #[serde(default, rename = "discord_secret_webhook_url")]
    pub secret_webhook: Option<String>,
    #[serde(default)]
    pub cookies_url: Option<String>,
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,
    #[serde(default)]
    pub cookies_key: Option<String>,
}

impl SecretInputs {
    /// Read the `.secrets.json` layer. A missing file is an empty layer.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        debug!("Loaded secrets from {}", path.display());
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read the environment layer through `lookup`, normally `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            webhook: get(ENV_WEBHOOK),
            secret_webhook: get(ENV_SECRET_WEBHOOK),
            cookies_url: get(ENV_COOKIES_URL),
            cookies_path: get(ENV_COOKIES_PATH).map(PathBuf::from),
            cookies_key: get(ENV_COOKIES_KEY),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn has_cookies(&self) -> bool {
        self.cookies_url.is_some() || self.cookies_path.is_some()
    }
}

impl fmt::Debug for SecretInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretInputs")
            .field("webhook", &self.webhook.is_some())
            .field("secret_webhook", &self.secret_webhook.is_some())
            .field("cookies_url", &self.cookies_url.is_some())
            .field("cookies_path", &self.cookies_path)
            .field("cookies_key", &self.cookies_key.is_some())
            .finish()
    }
}

/// Validated secrets for one run.
#[derive(Clone, Default)]
pub struct Secrets {
    pub webhook: Option<Webhook>,
    pub secret_webhook: Option<Webhook>,
    pub cookies: Option<CookieSource>,
}

impl Secrets {
    /// Merge the layers, highest precedence first.
    ///
    /// Webhooks are taken field by field. Cookie settings are taken as a group
    /// from the first layer that names a cookie file, preferring its URL over
    /// its local path.
    pub fn resolve(layers: &[SecretInputs]) -> Result<Self, ConfigError> {
        let first = |pick: fn(&SecretInputs) -> Option<&String>| {
            layers.iter().find_map(|l| pick(l).filter(|v| !v.trim().is_empty()).cloned())
        };

        let webhook = first(|l| l.webhook.as_ref())
            .map(|url| Webhook::new(url).map_err(|_| ConfigError::InvalidWebhook("webhook URL")))
            .transpose()?;
        let secret_webhook = first(|l| l.secret_webhook.as_ref())
            .map(|url| Webhook::new(url).map_err(|_| ConfigError::InvalidWebhook("secret webhook URL")))
            .transpose()?;

        let cookies = match layers.iter().find(|l| l.has_cookies()) {
            Some(layer) => Some(cookie_source(layer)?),
            None => None,
        };

        Ok(Self {
            webhook,
            secret_webhook,
            cookies,
        })
    }

    /// Resolve from `cli`, then `.secrets.json` in `dir`, then the environment.
    pub fn load(cli: SecretInputs, dir: &Path) -> Result<Self, ConfigError> {
        let file = SecretInputs::from_file(&dir.join(SECRETS_FILE))?;
        Self::resolve(&[cli, file, SecretInputs::from_env()])
    }
}

fn cookie_source(layer: &SecretInputs) -> Result<CookieSource, ConfigError> {
    if let Some(url) = &layer.cookies_url {
        let key = layer
            .cookies_key
            .as_deref()
            .map(|k| SecretKey::parse(k).map_err(|_| ConfigError::InvalidCookiesKey))
            .transpose()?;
        return Ok(CookieSource::Remote { url: url.clone(), key });
    }
    // has_cookies() guarantees one of the two.
    Ok(CookieSource::Local(layer.cookies_path.clone().unwrap_or_default()))
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("webhook", &self.webhook.is_some())
            .field("secret_webhook", &self.secret_webhook.is_some())
            .field("cookies", &self.cookies.is_some())
            .finish()
    }
}

/// Whether the process runs under CI, where logs are public.
pub fn detect_automated(lookup: impl Fn(&str) -> Option<String>) -> bool {
    ["GITHUB_ACTIONS", "CI"]
        .iter()
        .any(|name| lookup(name).is_some_and(|v| v.trim().eq_ignore_ascii_case("true")))
}

/// Everything one scrape run needs besides secrets.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub seed: Seed,
    pub bound: PageBound,
    pub keywords: Vec<String>,
    /// Persist everything seen without notifying.
    pub initialize: bool,
    /// Upload an encrypted backup with this expiry after the run.
    pub backup: Option<BackupExpiry>,
    pub automated: bool,
    /// Directory holding the store files.
    pub store_dir: PathBuf,
}

impl RunConfig {
    pub fn new(seed_url: &str) -> Self {
        let seed = Seed::parse(seed_url);
        Self {
            bound: PageBound::default_for(seed.source),
            seed,
            keywords: Vec::new(),
            initialize: false,
            backup: None,
            automated: false,
            store_dir: PathBuf::from("."),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_dir.join(self.seed.source.store_file_name())
    }

    /// Notifications need a webhook unless the run only initializes the store.
    /// Reject a run that could not finish: notifications without a webhook,
    /// or a backup without a channel allowed to receive its key.
    pub fn check_secrets(&self, secrets: &Secrets) -> Result<(), ConfigError> {
        if !self.initialize && secrets.webhook.is_none() {
            return Err(ConfigError::MissingWebhook);
        }
        if self.backup.is_some() {
            resolve_backup_channel(&self.channel_config(secrets))?;
        }
        Ok(())
    }

    pub fn channel_config(&self, secrets: &Secrets) -> ChannelConfig {
        ChannelConfig {
            secret: secrets.secret_webhook.clone(),
            regular: secrets.webhook.clone(),
            automated: self.automated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use std::collections::HashMap;

    fn layer(webhook: Option<&str>, cookies_path: Option<&str>) -> SecretInputs {
        SecretInputs {
            webhook: webhook.map(String::from),
            cookies_path: cookies_path.map(PathBuf::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_cli_beats_file_beats_env() {
        let cli = layer(Some("https://discord.com/api/webhooks/cli"), None);
        let file = layer(Some("https://discord.com/api/webhooks/file"), Some("file-cookies.txt"));
        let env = SecretInputs {
            secret_webhook: Some("https://discord.com/api/webhooks/env-secret".into()),
            ..layer(Some("https://discord.com/api/webhooks/env"), Some("env-cookies.txt"))
        };

        let secrets = Secrets::resolve(&[cli, file, env]).unwrap();
        assert_eq!(
            secrets.webhook,
            Some(Webhook::new("https://discord.com/api/webhooks/cli").unwrap())
        );
        assert_eq!(
            secrets.secret_webhook,
            Some(Webhook::new("https://discord.com/api/webhooks/env-secret").unwrap())
        );
        assert!(matches!(
            secrets.cookies,
            Some(CookieSource::Local(ref p)) if p == Path::new("file-cookies.txt")
        ));
    }

    #[test]
    fn test_remote_cookies_need_valid_key() {
        let remote = SecretInputs {
            cookies_url: Some("https://example.org/cookies.txt.gz.enc".into()),
            cookies_key: Some("bad".into()),
            ..Default::default()
        };
        assert!(matches!(Secrets::resolve(&[remote]), Err(ConfigError::InvalidCookiesKey)));
    }

    #[test]
    fn test_secrets_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SECRETS_FILE);
        assert!(SecretInputs::from_file(&path).unwrap().webhook.is_none());

        fs::write(
            &path,
            r#"{"discord_webhook_url": "https://discord.com/api/webhooks/f", "cookies_path": "c.txt"}"#,
        )
        .unwrap();
        let inputs = SecretInputs::from_file(&path).unwrap();
        assert_eq!(inputs.webhook.as_deref(), Some("https://discord.com/api/webhooks/f"));
        assert_eq!(inputs.cookies_path, Some(PathBuf::from("c.txt")));

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(SecretInputs::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_layer_and_automation() {
        let vars: HashMap<&str, &str> = [(ENV_WEBHOOK, "https://discord.com/api/webhooks/e"), ("CI", "true")]
            .into_iter()
            .collect();
        let lookup = |name: &str| vars.get(name).map(|v| v.to_string());
        assert!(SecretInputs::from_lookup(lookup).webhook.is_some());
        assert!(detect_automated(lookup));
        assert!(!detect_automated(|_| None));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let secrets = Secrets::resolve(&[layer(Some("https://discord.com/api/webhooks/123/tok"), None)]).unwrap();
        assert!(!format!("{:?}", secrets).contains("tok"));
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::new("https://animetosho.org/comments");
        assert_eq!(config.seed.source, SourceKind::AnimeTosho);
        assert_eq!(config.bound, PageBound::Max(5));
        assert_eq!(config.store_path(), PathBuf::from("./database.at.json"));

        let secrets = Secrets::default();
        assert!(matches!(config.check_secrets(&secrets), Err(ConfigError::MissingWebhook)));
        let init = RunConfig {
            initialize: true,
            ..config
        };
        assert!(init.check_secrets(&secrets).is_ok());
    }

    #[test]
    fn test_automated_backup_without_secret_channel_rejected_upfront() {
        let regular = Secrets::resolve(&[layer(Some("https://discord.com/api/webhooks/1/tok"), None)]).unwrap();
        let config = RunConfig {
            backup: Some(BackupExpiry::default()),
            automated: true,
            ..RunConfig::new("https://nyaa.si/?q=ember")
        };
        assert!(matches!(
            config.check_secrets(&regular),
            Err(ConfigError::BackupChannel(SecretChannelMissingError::Automated))
        ));

        let interactive = RunConfig {
            automated: false,
            ..config.clone()
        };
        assert!(interactive.check_secrets(&regular).is_ok());

        let without_backup = RunConfig { backup: None, ..config };
        assert!(without_backup.check_secrets(&regular).is_ok());
    }
}
