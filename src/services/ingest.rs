//! One scrape run: crawl, filter, diff against the store, save, notify.
//!
//! Separated from UI concerns; progress is reported through [`IngestEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::diff::{assign_tail_positions, reconcile, DiffMode};
use crate::filter::KeywordFilter;
use crate::models::{Comment, ItemId, Seed};
use crate::notify::{CommentEvent, DeliveryOutcome, Notifier};
use crate::scrapers::{Clock, ItemComments, ItemPageParser, PageBound, PageFetcher, Paginator, ScrapedItem};
use crate::storage::{CommentStore, StoreError, StoreFile};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Progress of a run.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    PageParsed { page: u32, items: usize },
    ItemChecked { item: ItemId, new_comments: usize },
    Notifying { total: usize },
    Notified { item: ItemId, comment_id: u64, delivered: bool },
}

/// Summary of a finished run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub pages_fetched: u32,
    pub items_seen: usize,
    pub items_filtered_out: usize,
    pub items_changed: usize,
    /// Items whose comments could not be fetched this run.
    pub items_failed: usize,
    pub skipped_entries: usize,
    pub new_comments: usize,
    pub delivered: usize,
    pub undelivered: usize,
    pub store_saved: bool,
    /// Why the crawl ended early, if it did.
    pub aborted: Option<String>,
}

/// What to crawl and how to treat what is found.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub seed: Seed,
    pub bound: PageBound,
    pub keywords: KeywordFilter,
    pub mode: DiffMode,
}

impl From<&RunConfig> for IngestOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            seed: config.seed.clone(),
            bound: config.bound,
            keywords: KeywordFilter::new(&config.keywords),
            mode: if config.initialize {
                DiffMode::Initialize
            } else {
                DiffMode::Notify
            },
        }
    }
}

pub struct IngestService {
    fetcher: Arc<dyn PageFetcher>,
    notifier: Option<Notifier>,
    events: Option<mpsc::Sender<IngestEvent>>,
    clock: Clock,
}

impl IngestService {
    pub fn new(fetcher: Arc<dyn PageFetcher>, notifier: Option<Notifier>) -> Self {
        Self {
            fetcher,
            notifier,
            events: None,
            clock: chrono::Utc::now,
        }
    }

    /// Anchor relative feed dates to `clock`.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<IngestEvent>) -> Self {
        self.events = Some(events);
        self
    }

    async fn emit(&self, event: IngestEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Run once against `store_file`, returning the report and the updated store.
    pub async fn run(
        &self,
        store_file: &StoreFile,
        options: &IngestOptions,
    ) -> Result<(IngestReport, CommentStore), IngestError> {
        let mut store = store_file.load()?;
        let mut report = IngestReport::default();

        let candidates = self.crawl(options, &mut report).await;
        let mut queue = Vec::new();

        for item in candidates {
            let id = item.id.clone();
            let (title, mut fresh) = match self.fresh_comments(&item, &store, options).await {
                Fresh::Thread { title, comments } => (title, comments),
                Fresh::Unchanged => continue,
                Fresh::Unavailable => {
                    report.items_failed += 1;
                    continue;
                }
            };

            let stored = store.comments(&id);
            if options.seed.source.has_partial_threads() {
                assign_tail_positions(&mut fresh, stored);
            }
            let diff = reconcile(&id, &fresh, stored, options.mode);
            self.emit(IngestEvent::ItemChecked {
                item: id.clone(),
                new_comments: diff.new.len(),
            })
            .await;

            queue.extend(diff.new.into_iter().map(|comment| CommentEvent {
                source: options.seed.source,
                item: id.clone(),
                link_key: item.link_key.clone(),
                title: title.clone(),
                comment,
            }));
            if diff.changed {
                report.items_changed += 1;
                store.update(id, diff.merged);
            }
        }

        if report.items_changed > 0 {
            store_file.save(&store)?;
            report.store_saved = true;
        } else {
            debug!("Nothing changed, leaving {} untouched", store_file.path().display());
        }

        report.new_comments = queue.len();
        self.deliver(queue, options.mode, &mut report).await;
        Ok((report, store))
    }

    /// Crawl the seed and collect matching items, merged by id across pages.
    async fn crawl(&self, options: &IngestOptions, report: &mut IngestReport) -> Vec<ScrapedItem> {
        let mut paginator =
            Paginator::new(self.fetcher.as_ref(), options.seed.clone(), options.bound).with_clock(self.clock);
        let mut items: Vec<ScrapedItem> = Vec::new();
        let mut index: HashMap<ItemId, usize> = HashMap::new();
        let mut page_number = 0;

        while let Some(page) = paginator.next().await {
            page_number += 1;
            report.skipped_entries += page.skipped;
            self.emit(IngestEvent::PageParsed {
                page: page_number,
                items: page.items.len(),
            })
            .await;

            for item in page.items {
                report.items_seen += 1;
                if !options.keywords.matches(&item.display_title()) {
                    report.items_filtered_out += 1;
                    continue;
                }
                match index.get(&item.id) {
                    Some(&slot) => merge_sightings(&mut items[slot], item),
                    None => {
                        index.insert(item.id.clone(), items.len());
                        items.push(item);
                    }
                }
            }
        }

        let crawl = paginator.run().await;
        report.pages_fetched = crawl.pages_fetched;
        report.aborted = crawl.aborted.map(|e| e.to_string());
        info!(
            "Crawled {} pages: {} items, {} kept after filtering",
            report.pages_fetched,
            report.items_seen,
            items.len()
        );
        items
    }

    /// The item's current thread, fetching its page when a listing only gave a count.
    async fn fresh_comments(&self, item: &ScrapedItem, store: &CommentStore, options: &IngestOptions) -> Fresh {
        let count = match &item.comments {
            ItemComments::Thread(comments) => {
                return Fresh::Thread {
                    title: item.display_title(),
                    comments: comments.clone(),
                }
            }
            ItemComments::Count(count) => *count,
        };

        // A count no higher than what is stored means nothing new to fetch.
        if count <= store.comments(&item.id).len() {
            return Fresh::Unchanged;
        }
        let ItemId::Numeric(numeric_id) = item.id else {
            warn!("Listing item {} has no numeric id", item.id);
            return Fresh::Unavailable;
        };

        let source = options.seed.source;
        let url = source.item_url(&item.link_key);
        let raw = match self.fetcher.fetch(&url).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not fetch comments for item {}: {}", item.id, e);
                return Fresh::Unavailable;
            }
        };
        let page = match ItemPageParser::new(source, numeric_id).parse(&raw) {
            Ok(page) => page,
            Err(e) => {
                warn!("Could not parse item {}: {}", item.id, e);
                return Fresh::Unavailable;
            }
        };

        match page.items.into_iter().next() {
            Some(ScrapedItem {
                title,
                comments: ItemComments::Thread(comments),
                ..
            }) => Fresh::Thread {
                title: title.unwrap_or_else(|| item.display_title()),
                comments,
            },
            _ => Fresh::Unavailable,
        }
    }

    async fn deliver(&self, mut queue: Vec<CommentEvent>, mode: DiffMode, report: &mut IngestReport) {
        if queue.is_empty() || mode == DiffMode::Initialize {
            return;
        }
        let Some(notifier) = &self.notifier else {
            warn!("{} new comments but no webhook to notify", queue.len());
            report.undelivered = queue.len();
            return;
        };

        // Oldest first across all items.
        queue.sort_by_key(|e| (e.comment.timestamp, e.comment.pos));
        self.emit(IngestEvent::Notifying { total: queue.len() }).await;

        for event in &queue {
            let delivered = matches!(notifier.notify(event).await, DeliveryOutcome::Delivered);
            if delivered {
                report.delivered += 1;
            } else {
                report.undelivered += 1;
            }
            self.emit(IngestEvent::Notified {
                item: event.item.clone(),
                comment_id: event.comment.id,
                delivered,
            })
            .await;
        }
    }
}

enum Fresh {
    Thread { title: String, comments: Vec<Comment> },
    Unchanged,
    Unavailable,
}

/// Combine two sightings of the same item from different pages.
fn merge_sightings(existing: &mut ScrapedItem, other: ScrapedItem) {
    if existing.title.is_none() {
        existing.title = other.title;
    }
    match (&mut existing.comments, other.comments) {
        (ItemComments::Thread(comments), ItemComments::Thread(more)) => comments.extend(more),
        (ItemComments::Count(count), ItemComments::Count(more)) => *count = (*count).max(more),
        (slot, more) => {
            if more.count() > slot.count() {
                *slot = more;
            }
        }
    }
}
