//! Restore a store file from a backup archive.

use std::path::Path;

use anyhow::Context;
use console::style;

use crate::backup;
use crate::crypto::SecretKey;
use crate::storage::CommentStore;

/// Decrypt `archive` with `key` and write the store JSON to `output`.
///
/// Nothing is written unless decryption and validation succeed.
pub async fn cmd_decrypt(archive: &Path, key: &str, output: &Path) -> anyhow::Result<()> {
    let key = SecretKey::parse(key).context("Invalid decryption key")?;
    let bytes = tokio::fs::read(archive)
        .await
        .with_context(|| format!("Could not read {}", archive.display()))?;

    let plain = backup::restore(&bytes, &key).context("Could not restore backup")?;
    let items = CommentStore::from_json_bytes(&plain)
        .map(|store| store.len())
        .unwrap_or_default();

    tokio::fs::write(output, &plain)
        .await
        .with_context(|| format!("Could not write {}", output.display()))?;

    println!(
        "{} Restored {} items to {}",
        style("✓").green(),
        items,
        output.display()
    );
    Ok(())
}
