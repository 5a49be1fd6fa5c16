//! The scrape command: one ingestion run, then an optional backup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::backup::{BackupExpiry, BackupPipeline, Litterbox};
use crate::config::{detect_automated, RunConfig, SecretInputs, Secrets};
use crate::notify::{Notifier, ReqwestTransport, WebhookTransport};
use crate::scrapers::{load_cookie_jar, ClientOptions, HttpClient, PageBound};
use crate::services::{IngestEvent, IngestOptions, IngestReport, IngestService};
use crate::storage::{CommentStore, StoreFile};

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Search listing, user page, single item page or AnimeTosho comment feed
    pub url: String,

    /// Only check items whose title contains one of these (case-insensitive)
    #[arg(short, long = "keyword")]
    pub keywords: Vec<String>,

    /// Pages to crawl: a number, 0 or "auto" for the advertised count, or "unlimited"
    #[arg(short, long, env = "MAX_PAGES")]
    pub max_pages: Option<PageBound>,

    /// Record every comment without sending notifications (first run)
    #[arg(long, visible_alias = "dump-comments")]
    pub initialize: bool,

    /// Upload an encrypted backup of the store after the run
    #[arg(long)]
    pub upload_db: bool,

    /// How long the backup stays downloadable: 1h, 12h, 24h or 72h
    #[arg(long, default_value = "12h")]
    pub db_expiry: BackupExpiry,

    /// Directory holding the store files
    #[arg(long, env = "STORE_DIR", default_value = ".")]
    pub store_dir: PathBuf,

    /// Webhook URL for comment notifications
    #[arg(long)]
    pub webhook: Option<String>,

    /// Webhook URL allowed to receive backup keys
    #[arg(long)]
    pub secret_webhook: Option<String>,

    /// Netscape cookie file for logged-in listings
    #[arg(long)]
    pub cookies: Option<PathBuf>,

    /// URL to download the cookie file from
    #[arg(long)]
    pub cookies_url: Option<String>,

    /// Key for an encrypted (.enc) cookie download
    #[arg(long)]
    pub cookies_key: Option<String>,

    /// User agent for page requests; "identify" sends this tool's own
    #[arg(long, env = "SCRAPER_USER_AGENT")]
    pub user_agent: Option<String>,
}

impl ScrapeArgs {
    fn secret_inputs(&self) -> SecretInputs {
        SecretInputs {
            webhook: self.webhook.clone(),
            secret_webhook: self.secret_webhook.clone(),
            cookies_url: self.cookies_url.clone(),
            cookies_path: self.cookies.clone(),
            cookies_key: self.cookies_key.clone(),
        }
    }

    pub(crate) fn run_config(&self, automated: bool) -> RunConfig {
        let mut config = RunConfig::new(&self.url);
        if let Some(bound) = self.max_pages {
            config.bound = bound;
        }
        config.keywords = self.keywords.clone();
        config.initialize = self.initialize;
        config.backup = self.upload_db.then_some(self.db_expiry);
        config.automated = automated;
        config.store_dir = self.store_dir.clone();
        config
    }
}

/// Run one scrape.
pub async fn cmd_scrape(args: ScrapeArgs) -> anyhow::Result<()> {
    let automated = detect_automated(|name| std::env::var(name).ok());
    let config = args.run_config(automated);
    let cwd = std::env::current_dir().context("Could not determine working directory")?;
    let secrets = Secrets::load(args.secret_inputs(), &cwd)?;
    config.check_secrets(&secrets)?;

    let cookies = match &secrets.cookies {
        Some(source) => Some(load_cookie_jar(source).await?),
        None => None,
    };
    let options = ClientOptions {
        user_agent: args.user_agent.clone(),
        ..ClientOptions::default()
    };
    let fetcher = Arc::new(HttpClient::with_cookies(options, cookies)?);
    let transport: Arc<dyn WebhookTransport> = Arc::new(ReqwestTransport::new()?);
    let notifier = secrets
        .webhook
        .clone()
        .map(|webhook| Notifier::new(transport.clone(), webhook));

    let scope = if config.seed.is_single_item() {
        "one item".to_string()
    } else {
        format!("pages: {}", config.bound)
    };
    println!(
        "{} Checking {} ({}{})",
        style("→").cyan(),
        config.seed.source,
        scope,
        if config.initialize { ", initializing" } else { "" }
    );

    let (event_tx, event_rx) = mpsc::channel(64);
    let progress = tokio::spawn(render_progress(event_rx));

    let store_file = StoreFile::new(config.store_path());
    let service = IngestService::new(fetcher, notifier).with_events(event_tx);
    let result = service.run(&store_file, &IngestOptions::from(&config)).await;
    // Dropping the service closes the event channel.
    drop(service);
    progress.await?;

    let (report, store) = result?;
    print_summary(&report, &config, &store_file);

    if let Some(expiry) = config.backup {
        run_backup(&config, &secrets, transport, &store, &store_file, expiry).await?;
    }
    Ok(())
}

async fn run_backup(
    config: &RunConfig,
    secrets: &Secrets,
    transport: Arc<dyn WebhookTransport>,
    store: &CommentStore,
    store_file: &StoreFile,
    expiry: BackupExpiry,
) -> anyhow::Result<()> {
    let spinner = spinner("Uploading encrypted backup...");
    let mut pipeline = BackupPipeline::new(Arc::new(Litterbox::new()?), transport);
    let result = pipeline
        .run(store, &store_file.file_name(), expiry, &config.channel_config(secrets))
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(receipt) => {
            println!(
                "{} Backup {} uploaded, expires in {}",
                style("✓").green(),
                receipt.archive_name,
                receipt.expiry
            );
            if !receipt.delivered_to_secret_channel {
                println!(
                    "  {} Key was posted to the regular webhook; set a secret webhook to keep it private",
                    style("!").yellow()
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Backup failed while {}", style("✗").red(), e.stage());
            Err(e.into())
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb
}

/// Draw crawl and delivery progress until the service hangs up.
async fn render_progress(mut events: mpsc::Receiver<IngestEvent>) {
    let crawl = spinner("Fetching page 1...");
    let mut delivery: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        match event {
            IngestEvent::PageParsed { page, items } => {
                crawl.set_message(format!("Page {} parsed, {} items", page, items));
            }
            IngestEvent::ItemChecked { item, new_comments } => {
                crawl.set_message(format!("Item {}: {} new", item, new_comments));
            }
            IngestEvent::Notifying { total } => {
                crawl.finish_and_clear();
                let bar = ProgressBar::new(total as u64);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▓░"),
                );
                bar.set_message("Sending notifications...");
                delivery = Some(bar);
            }
            IngestEvent::Notified { comment_id, delivered, .. } => {
                if let Some(bar) = &delivery {
                    if !delivered {
                        bar.set_message(format!("Comment {} not delivered", comment_id));
                    }
                    bar.inc(1);
                }
            }
        }
    }

    crawl.finish_and_clear();
    if let Some(bar) = delivery {
        bar.finish_and_clear();
    }
}

fn print_summary(report: &IngestReport, config: &RunConfig, store_file: &StoreFile) {
    println!(
        "{} Checked {} items on {} pages",
        style("✓").green(),
        report.items_seen - report.items_filtered_out,
        report.pages_fetched
    );
    if report.items_filtered_out > 0 {
        println!(
            "  {} {} items did not match the keywords",
            style("→").dim(),
            report.items_filtered_out
        );
    }

    if config.initialize {
        println!(
            "{} Recorded comments for {} items without notifying",
            style("✓").green(),
            report.items_changed
        );
    } else if report.new_comments == 0 {
        println!("{} No new comments", style("✓").green());
    } else {
        println!(
            "{} Delivered {} of {} new comments",
            style("✓").green(),
            report.delivered,
            report.new_comments
        );
    }

    if report.undelivered > 0 {
        println!(
            "  {} {} notifications could not be delivered",
            style("!").yellow(),
            report.undelivered
        );
    }
    if report.items_failed > 0 {
        println!(
            "  {} {} items could not be fetched",
            style("!").yellow(),
            report.items_failed
        );
    }
    if report.skipped_entries > 0 {
        println!(
            "  {} {} entries could not be parsed",
            style("!").yellow(),
            report.skipped_entries
        );
    }
    if let Some(reason) = &report.aborted {
        println!("  {} Crawl stopped early: {}", style("!").yellow(), reason);
    }
    if report.store_saved {
        println!(
            "  {} Saved {}",
            style("→").dim(),
            store_file.path().display()
        );
    }
}
