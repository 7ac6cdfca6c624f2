//! Shared HTTP connection resource handed to every worker.
//!
//! Wraps a single `reqwest::Client` (which owns the keep-alive pool) and
//! layers two permit sets over it: one for the total connection cap and one
//! per route (`host:port`). The per-route cap is set independently of the
//! total so a crawl that hammers a single host cannot starve the others,
//! and a crawl across many hosts is not throttled to a tiny default.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::{Client, Url};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{CrawlrError, Result};
use crate::settings::DispatchSettings;

/// Default user agent sent with every request
const DEFAULT_USER_AGENT: &str = concat!("crawlr/", env!("CARGO_PKG_VERSION"));

/// Settings for building a `ConnectionPool`
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_connections: usize,
    pub max_per_route: usize,
    pub timeout: Duration,
    pub validate_after_inactivity: Duration,
    pub user_agent: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for ConnectionSettings {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            max_per_route: settings.per_route_cap(),
            timeout: settings.connection_timeout(),
            validate_after_inactivity: settings.connection_validate_interval(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ConnectionSettings {
    /// Override the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Body of a completed GET
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: Url,
    pub status: u16,
    pub body: String,
    /// Body was cut off at the read limit.
    pub truncated: bool,
}

impl Fetched {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Permission to use one connection on one route.
///
/// Both permits are released when the lease is dropped.
#[derive(Debug)]
pub struct Lease {
    client: Client,
    route: String,
    _route_permit: OwnedSemaphorePermit,
    _total_permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn route(&self) -> &str {
        &self.route
    }
}

/// Connection pool shared by all worker executions
#[derive(Debug)]
pub struct ConnectionPool {
    client: Mutex<Option<Client>>,
    total: Arc<Semaphore>,
    routes: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_per_route: usize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Build the pool and its HTTP client
    pub fn new(settings: &ConnectionSettings) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(settings.max_per_route)
            .pool_idle_timeout(settings.validate_after_inactivity)
            .connect_timeout(settings.timeout)
            .read_timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| CrawlrError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!(
            max_connections = settings.max_connections,
            max_per_route = settings.max_per_route,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Connection pool created"
        );

        Ok(Self {
            client: Mutex::new(Some(client)),
            total: Arc::new(Semaphore::new(settings.max_connections)),
            routes: Mutex::new(HashMap::new()),
            max_per_route: settings.max_per_route,
            closed: AtomicBool::new(false),
        })
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn client(&self) -> Result<Client> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(CrawlrError::ConnectionClosed)
    }

    /// Wait for a connection slot on the URL's route.
    ///
    /// Fails with `ConnectionClosed` if the pool is closed before or while
    /// waiting.
    pub async fn lease(&self, url: &Url) -> Result<Lease> {
        if self.is_closed() {
            return Err(CrawlrError::ConnectionClosed);
        }

        let route = route_key(url)
            .ok_or_else(|| CrawlrError::Connection(format!("URL has no host: {}", url)))?;

        let route_permits = {
            let mut routes = self.routes();
            if !routes.contains_key(&route) {
                // Only the map holds an idle route's semaphore
                routes.retain(|_, permits| Arc::strong_count(permits) > 1);
            }
            routes
                .entry(route.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_route)))
                .clone()
        };

        // Route first so a blocked route never pins a global slot
        let route_permit = route_permits
            .acquire_owned()
            .await
            .map_err(|_| CrawlrError::ConnectionClosed)?;
        let total_permit = self
            .total
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CrawlrError::ConnectionClosed)?;

        Ok(Lease {
            client: self.client()?,
            route,
            _route_permit: route_permit,
            _total_permit: total_permit,
        })
    }

    /// GET a URL and read the body as text while holding a lease.
    pub async fn get_text(&self, url: &Url) -> Result<Fetched> {
        self.get_text_capped(url, usize::MAX).await
    }

    /// Like `get_text`, but stops reading after `max_bytes` of body.
    pub async fn get_text_capped(&self, url: &Url, max_bytes: usize) -> Result<Fetched> {
        let lease = self.lease(url).await?;
        let mut response = lease.client().get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();

        let mut bytes = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await? {
            let room = max_bytes - bytes.len();
            if chunk.len() > room {
                bytes.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(Fetched {
            url: final_url,
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            truncated,
        })
    }

    /// Release all pooled connections.
    ///
    /// Returns `false` if the pool was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.total.close();
        for (_, permits) in self.routes().drain() {
            permits.close();
        }
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        tracing::debug!("Connection pool closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Connection slots not currently leased
    pub fn available(&self) -> usize {
        self.total.available_permits()
    }

    /// Number of routes currently tracked. Idle routes are dropped when a
    /// new route is first leased.
    pub fn route_count(&self) -> usize {
        self.routes().len()
    }
}

/// Route key for a URL: `host:port`, with the scheme's default port filled in.
pub fn route_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host.to_ascii_lowercase(), port))
}
