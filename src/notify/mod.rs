//! Delivery of new-comment events to a Discord-compatible webhook.
//!
//! One comment is one delivery. A rate-limited delivery waits as instructed
//! and is retried a bounded number of times; anything else that fails is
//! reported and skipped so the remaining events still go out.

pub mod discord;

pub use discord::{backup_payload, comment_payload, Embed, WebhookPayload};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Comment, ItemId, SourceKind};
use crate::scrapers::USER_AGENT;

/// Rate-limited retries allowed per delivery.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);
/// Longest wait a webhook may ask for before the delivery is given up.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook URL is not a valid URL")]
    InvalidWebhook,
    /// Transport failure. The URL is stripped since webhook URLs carry a token.
    #[error("Webhook request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("Webhook rejected the message with HTTP {0}")]
    Status(u16),
    #[error("Still rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Webhook asked to wait {0:.0}s, longer than allowed")]
    WaitTooLong(f64),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Request(e.without_url())
    }
}

/// A webhook endpoint. The URL embeds a token, so it never appears in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Webhook(String);

impl Webhook {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let url = url.into();
        let parsed = url::Url::parse(url.trim()).map_err(|_| NotifyError::InvalidWebhook)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NotifyError::InvalidWebhook);
        }
        Ok(Webhook(url.trim().to_string()))
    }

    pub(crate) fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Webhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Webhook(<redacted>)")
    }
}

/// What the webhook answered, reduced to what delivery decisions need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Wait requested by a 429 answer.
    pub retry_after: Option<Duration>,
    /// Set when the rate-limit bucket is empty: time until it refills.
    pub bucket_reset_after: Option<Duration>,
}

impl TransportResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound side of a webhook.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, webhook: &Webhook, payload: &WebhookPayload) -> Result<TransportResponse, NotifyError>;
}

/// [`WebhookTransport`] over reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(&self, webhook: &Webhook, payload: &WebhookPayload) -> Result<TransportResponse, NotifyError> {
        let response = self.client.post(webhook.url()).json(payload).send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let bucket_reset_after = match headers
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
        {
            Some(remaining) if remaining.trim() == "0" => {
                Some(header_secs(&headers, "X-RateLimit-Reset-After").unwrap_or(FALLBACK_RETRY_AFTER))
            }
            _ => None,
        };

        let retry_after = if status == 429 {
            let body = response.text().await.unwrap_or_default();
            serde_json::from_str::<RateLimitBody>(&body)
                .ok()
                .and_then(|b| b.retry_after)
                .and_then(secs_to_duration)
                .or_else(|| header_secs(&headers, "Retry-After"))
                .or(Some(FALLBACK_RETRY_AFTER))
        } else {
            None
        };

        Ok(TransportResponse {
            status,
            retry_after,
            bucket_reset_after,
        })
    }
}

fn header_secs(headers: &HeaderMap, name: &str) -> Option<Duration> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(secs_to_duration)
}

/// Seconds from a rate-limit answer. Values too large for a `Duration` saturate.
fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .or_else(|| (secs > 0.0).then_some(Duration::MAX))
}

/// Result of delivering one message.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// The webhook asked to wait before trying again.
    RateLimited { retry_after: Duration },
    Failed(NotifyError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    fn from_response(response: &TransportResponse) -> Self {
        if response.is_success() {
            DeliveryOutcome::Delivered
        } else if response.status == 429 {
            DeliveryOutcome::RateLimited {
                retry_after: response.retry_after.unwrap_or(FALLBACK_RETRY_AFTER),
            }
        } else {
            DeliveryOutcome::Failed(NotifyError::Status(response.status))
        }
    }
}

/// Post `payload`, retrying rate-limited attempts up to `retry_budget` times.
///
/// Never returns [`DeliveryOutcome::RateLimited`]; an exhausted budget is a failure.
pub async fn deliver(
    transport: &dyn WebhookTransport,
    webhook: &Webhook,
    payload: &WebhookPayload,
    retry_budget: u32,
) -> DeliveryOutcome {
    let mut retries = 0;
    loop {
        let response = match transport.post(webhook, payload).await {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::Failed(e),
        };

        match DeliveryOutcome::from_response(&response) {
            DeliveryOutcome::Delivered => {
                if let Some(wait) = response.bucket_reset_after {
                    let wait = wait.min(MAX_RETRY_AFTER);
                    debug!("Webhook bucket empty, pausing {:.2}s", wait.as_secs_f64());
                    tokio::time::sleep(wait).await;
                }
                return DeliveryOutcome::Delivered;
            }
            DeliveryOutcome::RateLimited { retry_after } => {
                if retry_after > MAX_RETRY_AFTER {
                    return DeliveryOutcome::Failed(NotifyError::WaitTooLong(retry_after.as_secs_f64()));
                }
                if retries >= retry_budget {
                    return DeliveryOutcome::Failed(NotifyError::RateLimited(retries));
                }
                retries += 1;
                warn!(
                    "Rate limited by webhook, waiting {:.2}s (retry {}/{})",
                    retry_after.as_secs_f64(),
                    retries,
                    retry_budget
                );
                tokio::time::sleep(retry_after).await;
            }
            failed => return failed,
        }
    }
}

/// A new comment waiting to be announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub source: SourceKind,
    pub item: ItemId,
    /// Key used in the item URL.
    pub link_key: String,
    pub title: String,
    pub comment: Comment,
}

/// Sends comment events to the regular notification channel.
pub struct Notifier {
    transport: Arc<dyn WebhookTransport>,
    webhook: Webhook,
    retry_budget: u32,
}

impl Notifier {
    pub fn new(transport: Arc<dyn WebhookTransport>, webhook: Webhook) -> Self {
        Self {
            transport,
            webhook,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub async fn notify(&self, event: &CommentEvent) -> DeliveryOutcome {
        let payload = comment_payload(event);
        let outcome = deliver(self.transport.as_ref(), &self.webhook, &payload, self.retry_budget).await;
        if let DeliveryOutcome::Failed(e) = &outcome {
            warn!("Could not notify comment {} on item {}: {}", event.comment.id, event.item, e);
        }
        outcome
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("webhook", &self.webhook)
            .field("retry_budget", &self.retry_budget)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use crate::models::CommentUser;

    fn event() -> CommentEvent {
        CommentEvent {
            source: SourceKind::Nyaa,
            item: ItemId::parse("42"),
            link_key: "42".into(),
            title: "Show".into(),
            comment: Comment::new(3, 3, 1_700_000_000, CommentUser::new("alice"), "hello"),
        }
    }

    fn throttled() -> Result<TransportResponse, NotifyError> {
        Ok(TransportResponse {
            status: 429,
            retry_after: Some(Duration::ZERO),
            bucket_reset_after: None,
        })
    }

    fn webhook() -> Webhook {
        Webhook::new("https://discord.com/api/webhooks/1/token").unwrap()
    }

    #[tokio::test]
    async fn test_delivered_first_try() {
        let transport = Arc::new(ScriptedTransport::default());
        let notifier = Notifier::new(transport.clone(), webhook());
        assert!(notifier.notify(&event()).await.is_delivered());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_then_success_resends_same_payload() {
        let transport = Arc::new(ScriptedTransport::answering(vec![throttled(), Ok(TransportResponse::with_status(204))]));
        let notifier = Notifier::new(transport.clone(), webhook());
        assert!(notifier.notify(&event()).await.is_delivered());

        let posted = transport.posted.lock().unwrap();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].1, posted[1].1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let answers = (0..10).map(|_| throttled()).collect();
        let transport = Arc::new(ScriptedTransport::answering(answers));
        let notifier = Notifier::new(transport.clone(), webhook());

        let outcome = notifier.notify(&event()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(NotifyError::RateLimited(3))));
        assert_eq!(transport.calls(), 1 + DEFAULT_RETRY_BUDGET as usize);
    }

    #[tokio::test]
    async fn test_zero_budget_gives_up_after_one_post() {
        let transport = Arc::new(ScriptedTransport::answering(vec![throttled(), throttled()]));
        let notifier = Notifier::new(transport.clone(), webhook()).with_retry_budget(0);
        assert!(!notifier.notify(&event()).await.is_delivered());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::answering(vec![Ok(TransportResponse::with_status(400))]));
        let notifier = Notifier::new(transport.clone(), webhook());
        let outcome = notifier.notify(&event()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(NotifyError::Status(400))));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_bucket_still_counts_as_delivered() {
        let transport = Arc::new(ScriptedTransport::answering(vec![Ok(TransportResponse {
            status: 200,
            retry_after: None,
            bucket_reset_after: Some(Duration::ZERO),
        })]));
        let notifier = Notifier::new(transport, webhook());
        assert!(notifier.notify(&event()).await.is_delivered());
    }

    #[tokio::test]
    async fn test_huge_retry_after_fails_the_delivery_only() {
        let transport = Arc::new(ScriptedTransport::answering(vec![
            Ok(TransportResponse {
                status: 429,
                retry_after: secs_to_duration(1e20),
                bucket_reset_after: None,
            }),
            Ok(TransportResponse::with_status(204)),
        ]));
        let notifier = Notifier::new(transport.clone(), webhook());

        let outcome = notifier.notify(&event()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(NotifyError::WaitTooLong(_))));
        assert_eq!(transport.calls(), 1);

        assert!(notifier.notify(&event()).await.is_delivered());
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(secs_to_duration(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(secs_to_duration(1e20), Some(Duration::MAX));
        assert_eq!(secs_to_duration(f64::INFINITY), Some(Duration::MAX));
        assert_eq!(secs_to_duration(-1.0), None);
        assert_eq!(secs_to_duration(f64::NAN), None);
    }

    #[test]
    fn test_webhook_is_redacted() {
        let rendered = format!("{:?}", webhook());
        assert!(!rendered.contains("token"));
        assert!(Webhook::new("not a url").is_err());
        assert!(Webhook::new("ftp://example.org/x").is_err());
    }
}
