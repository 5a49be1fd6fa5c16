//! Command-line interface.
//!
//! Parses arguments and dispatches to the command modules.

mod decrypt;
mod scrape;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use scrape::ScrapeArgs;

#[derive(Parser)]
#[command(name = "nyaa-comments")]
#[command(about = "Watch torrent index sites for new comments and post them to a webhook")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a listing, user page, item page or comment feed and notify about new comments
    Scrape(ScrapeArgs),

    /// Restore a store file from an encrypted backup archive
    Decrypt {
        /// Backup archive (.tar.gz)
        archive: PathBuf,
        /// Decryption key posted with the backup
        #[arg(short, long, env = "BACKUP_KEY", hide_env_values = true)]
        key: String,
        /// Where to write the restored store
        #[arg(short, long, default_value = "database.json")]
        output: PathBuf,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape(args) => scrape::cmd_scrape(args).await,
        Commands::Decrypt {
            archive,
            key,
            output,
        } => decrypt::cmd_decrypt(&archive, &key, &output).await,
    }
}
