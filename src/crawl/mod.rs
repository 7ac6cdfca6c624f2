//! Reference page crawler built on the dispatcher.
//!
//! - **page**: `PageTask`, ordered so shallow pages go first
//! - **links**: `href` extraction and URL resolution
//! - **worker**: `LinkWorker`, fetch + follow with depth and page limits

mod links;
mod page;
mod worker;

pub use links::{extract_links, same_host};
pub use page::{DEPTH_PENALTY, PageTask, SEED_PRIORITY};
pub use worker::{CrawlConfig, CrawlSummary, LinkWorker};
