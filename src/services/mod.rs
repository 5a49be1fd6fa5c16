//! Run orchestration, separated from UI concerns.
//!
//! Services report progress through event channels so the CLI can render it
//! however it likes.

pub mod ingest;

pub use ingest::{IngestError, IngestEvent, IngestOptions, IngestReport, IngestService};
