//! Page task: a URL to fetch plus its crawl depth.

use std::cmp::Ordering;
use std::fmt;

use reqwest::Url;

/// Priority given to seed pages.
pub const SEED_PRIORITY: i32 = 100;
/// Priority lost per link hop from a seed.
pub const DEPTH_PENALTY: i32 = 10;

/// One page to fetch.
///
/// Ordered by priority, then shallower depth, then URL so that the order is
/// total. Higher priority is dispatched first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub priority: i32,
    pub depth: u32,
    pub url: Url,
}

impl PageTask {
    pub fn seed(url: Url) -> Self {
        Self {
            priority: SEED_PRIORITY,
            depth: 0,
            url,
        }
    }

    /// Task for a link discovered on this page.
    pub fn child(&self, url: Url) -> Self {
        let depth = self.depth + 1;
        Self {
            priority: SEED_PRIORITY.saturating_sub(DEPTH_PENALTY.saturating_mul(depth as i32)),
            depth,
            url,
        }
    }
}

impl Ord for PageTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.url.as_str().cmp(self.url.as_str()))
    }
}

impl PartialOrd for PageTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (depth {}, priority {})", self.url, self.depth, self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_child_priority_drops_with_depth() {
        let seed = PageTask::seed(url("https://example.com/"));
        let child = seed.child(url("https://example.com/a"));
        let grandchild = child.child(url("https://example.com/b"));

        assert_eq!(seed.priority, 100);
        assert_eq!(child.priority, 90);
        assert_eq!(child.depth, 1);
        assert_eq!(grandchild.priority, 80);
        assert!(seed > child);
        assert!(child > grandchild);
    }

    #[test]
    fn test_queue_pops_shallow_pages_first() {
        let seed = PageTask::seed(url("https://example.com/"));
        let queue = TaskQueue::new();
        queue.push(seed.child(url("https://example.com/a")).child(url("https://example.com/deep")));
        queue.push(seed.child(url("https://example.com/a")));
        queue.push(seed.clone());

        assert_eq!(queue.pop().unwrap().depth, 0);
        assert_eq!(queue.pop().unwrap().depth, 1);
        assert_eq!(queue.pop().unwrap().depth, 2);
    }

    #[test]
    fn test_equal_priority_ordered_by_url() {
        let a = PageTask::seed(url("https://a.example/"));
        let b = PageTask::seed(url("https://b.example/"));
        assert!(a > b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_display() {
        let task = PageTask::seed(url("https://example.com/"));
        assert_eq!(task.to_string(), "https://example.com/ (depth 0, priority 100)");
    }
}
