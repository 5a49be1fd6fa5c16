//! Upload of backup archives to an ephemeral file host.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use tracing::debug;

use super::BackupExpiry;
use crate::scrapers::USER_AGENT;

pub const LITTERBOX_API: &str = "https://litterbox.catbox.moe/resources/internals/api.php";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Upload host returned HTTP {0}")]
    Status(u16),
    #[error("Upload host did not return a link: {0}")]
    Rejected(String),
}

/// Host that keeps an archive available until its expiry.
#[async_trait]
pub trait BackupUploader: Send + Sync {
    /// Upload `data` under `file_name`, returning the retrieval URL.
    async fn upload(&self, file_name: &str, data: Vec<u8>, expiry: BackupExpiry) -> Result<String, UploadError>;
}

/// Catbox Litterbox, which deletes uploads after 1 to 72 hours.
#[derive(Debug, Clone)]
pub struct Litterbox {
    client: reqwest::Client,
    endpoint: String,
}

impl Litterbox {
    pub fn new() -> Result<Self, UploadError> {
        Self::with_endpoint(LITTERBOX_API)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(UPLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl BackupUploader for Litterbox {
    async fn upload(&self, file_name: &str, data: Vec<u8>, expiry: BackupExpiry) -> Result<String, UploadError> {
        debug!("Uploading {} ({} bytes, expiry {})", file_name, data.len(), expiry);
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str("application/gzip")?;
        let form = Form::new()
            .text("reqtype", "fileupload")
            .text("time", expiry.as_str())
            .part("fileToUpload", part);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }
        parse_upload_response(&response.text().await?)
    }
}

/// The host answers with the bare link on success and an error text otherwise.
pub(crate) fn parse_upload_response(body: &str) -> Result<String, UploadError> {
    let body = body.trim();
    if body.starts_with("http") {
        Ok(body.to_string())
    } else {
        Err(UploadError::Rejected(body.chars().take(200).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_response() {
        assert_eq!(
            parse_upload_response("https://litter.catbox.moe/x1y2z3.gz\n").unwrap(),
            "https://litter.catbox.moe/x1y2z3.gz"
        );
        assert!(matches!(
            parse_upload_response("File too large"),
            Err(UploadError::Rejected(msg)) if msg == "File too large"
        ));
    }
}
