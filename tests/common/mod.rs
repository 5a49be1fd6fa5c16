//! In-memory fakes for the network seams.
//!
//! Each test binary uses a subset of these.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use nyaa_comments::backup::{BackupExpiry, BackupUploader, UploadError};
use nyaa_comments::notify::{NotifyError, TransportResponse, Webhook, WebhookPayload, WebhookTransport};
use nyaa_comments::scrapers::{FetchError, PageFetcher};

/// Serves canned pages by URL. Unknown URLs answer 404.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeSite {
    pages: Mutex<HashMap<String, String>>,
    pub requests: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeSite {
    pub fn serve(&self, url: &str, body: impl Into<String>) {
        self.pages.lock().unwrap().insert(url.to_string(), body.into());
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for FakeSite {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Records every payload per webhook; answers from a script, then 204.
#[derive(Default)]
pub struct RecordingWebhook {
    answers: Mutex<VecDeque<TransportResponse>>,
    pub posts: Mutex<Vec<(Webhook, WebhookPayload)>>,
}

impl RecordingWebhook {
    #[allow(dead_code)]
    pub fn answering(answers: Vec<TransportResponse>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn posts_to(&self, webhook: &Webhook) -> Vec<WebhookPayload> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(w, _)| w == webhook)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookTransport for RecordingWebhook {
    async fn post(&self, webhook: &Webhook, payload: &WebhookPayload) -> Result<TransportResponse, NotifyError> {
        self.posts.lock().unwrap().push((webhook.clone(), payload.clone()));
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| TransportResponse::with_status(204)))
    }
}

/// Keeps uploaded archives in memory.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryHost {
    pub uploads: Mutex<Vec<(String, Vec<u8>, BackupExpiry)>>,
}

#[async_trait]
impl BackupUploader for MemoryHost {
    async fn upload(&self, file_name: &str, data: Vec<u8>, expiry: BackupExpiry) -> Result<String, UploadError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((file_name.to_string(), data, expiry));
        Ok(format!("https://files.example/{}/{}", uploads.len(), file_name))
    }
}

pub fn webhook(name: &str) -> Webhook {
    Webhook::new(format!("https://discord.com/api/webhooks/{}/token", name)).unwrap()
}

/// A Nyaa item page with the given `(comment id, timestamp, user, body)` panels.
#[allow(dead_code)]
pub fn nyaa_item_page(title: &str, comments: &[(u64, i64, &str, &str)]) -> String {
    let panels: String = comments
        .iter()
        .enumerate()
        .map(|(i, (id, ts, user, body))| {
            format!(
                r##"<div class="panel panel-default comment-panel" id="com-{pos}">
                  <div class="panel-body">
                    <div class="col-md-2"><p><a class="text-default" href="/user/{user}" title="User">{user}</a></p></div>
                    <div class="col-md-10 comment-body">
                      <div class="row comment-details"><a href="#com-{pos}"><small data-timestamp="{ts}">date</small></a></div>
                      <div class="row comment-content" id="torrent-comment{id}">{body}</div>
                    </div>
                  </div>
                </div>"##,
                pos = i + 1
            )
        })
        .collect();
    format!(
        r#"<html><body><div class="panel"><h3 class="panel-title">{title}</h3></div><div id="comments">{panels}</div></body></html>"#
    )
}
