//! Worker that fetches a page and feeds its links back to the dispatcher.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionPool;
use crate::crawl::links::{extract_links, same_host};
use crate::crawl::page::PageTask;
use crate::error::{CrawlrError, Result};
use crate::pool::Worker;
use crate::task::TaskSubmitter;

/// Crawl limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Link hops followed from a seed.
    pub max_depth: u32,
    /// Pages fetched before further tasks are skipped.
    pub max_pages: usize,
    /// Only follow links on the page's own host.
    pub same_host_only: bool,
    /// Body bytes read per page; links past the cut are not seen.
    pub max_body_bytes: usize,
    pub user_agent: Option<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 100,
            same_host_only: true,
            max_body_bytes: 2 * 1024 * 1024,
            user_agent: None,
        }
    }
}

/// Counters for one crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub fetched: usize,
    pub failed: usize,
    pub discovered: usize,
    pub skipped: usize,
}

/// Fetches pages through the shared connection pool and resubmits new links.
#[derive(Debug)]
pub struct LinkWorker {
    config: CrawlConfig,
    seen: Mutex<HashSet<String>>,
    claimed: AtomicUsize,
    fetched: AtomicUsize,
    failed: AtomicUsize,
    discovered: AtomicUsize,
    skipped: AtomicUsize,
}

impl LinkWorker {
    pub fn new(config: CrawlConfig) -> Self {
        Self {
            config,
            seen: Mutex::new(HashSet::new()),
            claimed: AtomicUsize::new(0),
            fetched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            discovered: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Record a URL as seen. Returns `false` if it already was.
    pub fn mark_seen(&self, url: &Url) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.as_str().to_string())
    }

    /// Seed tasks for the given URLs, skipping duplicates.
    pub fn seed_tasks(&self, urls: impl IntoIterator<Item = Url>) -> Vec<PageTask> {
        urls.into_iter()
            .filter(|url| self.mark_seen(url))
            .map(PageTask::seed)
            .collect()
    }

    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            fetched: self.fetched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn follow(&self, page: &PageTask, final_url: &Url, body: &str) -> Vec<PageTask> {
        if page.depth >= self.config.max_depth {
            return Vec::new();
        }

        extract_links(final_url, body)
            .into_iter()
            .filter(|link| !self.config.same_host_only || same_host(link, &page.url))
            .filter(|link| self.mark_seen(link))
            .map(|link| page.child(link))
            .collect()
    }
}

#[async_trait]
impl Worker<PageTask> for LinkWorker {
    async fn process(
        &self,
        connections: Arc<ConnectionPool>,
        task: PageTask,
        submitter: Arc<dyn TaskSubmitter<PageTask>>,
    ) -> Result<()> {
        if self.claimed.fetch_add(1, Ordering::AcqRel) >= self.config.max_pages {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(url = %task.url, "Page budget spent, skipping");
            return Ok(());
        }

        let fetched = match connections
            .get_text_capped(&task.url, self.config.max_body_bytes)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if !fetched.is_success() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(CrawlrError::Worker(format!(
                "{} returned status {}",
                task.url, fetched.status
            )));
        }
        self.fetched.fetch_add(1, Ordering::Relaxed);
        if fetched.truncated {
            tracing::debug!(url = %task.url, limit = self.config.max_body_bytes, "Page body truncated");
        }

        let children = self.follow(&task, &fetched.url, &fetched.body);
        tracing::debug!(url = %task.url, depth = task.depth, links = children.len(), "Fetched page");

        self.discovered.fetch_add(children.len(), Ordering::Relaxed);
        submitter.submit_tasks(children);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSettings;
    use crate::queue::TaskQueue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_seed_tasks_dedupe() {
        let worker = LinkWorker::new(CrawlConfig::default());
        let seeds = worker.seed_tasks([
            url("https://example.com/"),
            url("https://example.com/"),
            url("https://other.example/"),
        ]);
        assert_eq!(seeds.len(), 2);
        assert!(seeds.iter().all(|s| s.depth == 0));
    }

    #[test]
    fn test_follow_same_host_only() {
        let worker = LinkWorker::new(CrawlConfig::default());
        let page = PageTask::seed(url("https://example.com/"));
        let html = r#"<a href="/a">a</a><a href="https://other.example/b">b</a>"#;

        let children = worker.follow(&page, &page.url, html);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].url.as_str(), "https://example.com/a");
        assert_eq!(children[0].depth, 1);
    }

    #[test]
    fn test_follow_skips_seen_links() {
        let worker = LinkWorker::new(CrawlConfig {
            same_host_only: false,
            ..Default::default()
        });
        let page = PageTask::seed(url("https://example.com/"));
        let html = r#"<a href="/a">a</a><a href="https://other.example/b">b</a>"#;

        assert_eq!(worker.follow(&page, &page.url, html).len(), 2);
        assert!(worker.follow(&page, &page.url, html).is_empty());
    }

    #[test]
    fn test_follow_stops_at_max_depth() {
        let worker = LinkWorker::new(CrawlConfig {
            max_depth: 1,
            ..Default::default()
        });
        let page = PageTask::seed(url("https://example.com/")).child(url("https://example.com/a"));
        assert!(worker.follow(&page, &page.url, r#"<a href="/b">b</a>"#).is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhausted_skips_without_fetching() {
        let worker = LinkWorker::new(CrawlConfig {
            max_pages: 0,
            ..Default::default()
        });
        let connections = Arc::new(ConnectionPool::new(&ConnectionSettings::default()).unwrap());
        let queue: Arc<TaskQueue<PageTask>> = Arc::new(TaskQueue::new());

        worker
            .process(connections, PageTask::seed(url("https://example.com/")), queue)
            .await
            .unwrap();

        assert_eq!(worker.summary().skipped, 1);
        assert_eq!(worker.summary().fetched, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_counts_failure() {
        let worker = LinkWorker::new(CrawlConfig::default());
        let connections = Arc::new(ConnectionPool::new(&ConnectionSettings::default()).unwrap());
        connections.close();
        let queue: Arc<TaskQueue<PageTask>> = Arc::new(TaskQueue::new());

        let result = worker
            .process(connections, PageTask::seed(url("https://example.com/")), queue)
            .await;

        assert!(matches!(result, Err(CrawlrError::ConnectionClosed)));
        assert_eq!(worker.summary().failed, 1);
    }
}
