//! Comment watcher for torrent index sites.
//!
//! Crawls Nyaa, Sukebei and AnimeTosho pages, keeps a per-source history of
//! every comment seen, posts new ones to a Discord-compatible webhook and can
//! ship an encrypted backup of the history to an expiring file host.

pub mod backup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod diff;
pub mod filter;
pub mod models;
pub mod notify;
pub mod scrapers;
pub mod services;
pub mod storage;
pub mod utils;
