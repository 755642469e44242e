//! Pure text processing for job-listing emails and pages.
//!
//! Nothing in this crate touches the network or the filesystem.

pub mod links;
pub mod text;

pub use links::{merge_links, normalize_url, LinkExtractor};
pub use text::{listing_text, page_title};
