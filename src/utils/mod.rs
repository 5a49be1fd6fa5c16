//! Shared utility functions.
//!
//! - `html`: text extraction and HTML-to-Markdown conversion for comment bodies

pub mod html;

pub use html::{element_text, html_to_markdown, truncate_chars};
