//! crawlr - throttled task dispatch for crawler worker pools
//!
//! Holds a priority-ordered backlog, releases it to a fixed pool of worker
//! slots at an adaptive rate, and shuts the pool down once the work runs out.

pub mod connection;
pub mod crawl;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod settings;
pub mod task;

pub use connection::{ConnectionPool, ConnectionSettings};
pub use error::{CrawlrError, Result};
pub use events::{ManagerEvents, NoopEvents, TracingEvents};
pub use manager::{Manager, ManagerBuilder, ManagerState, ManagerStats, StartOutcome, StopInitiator, StopReport};
pub use pool::{WorkUnit, Worker, WorkerPool};
pub use queue::TaskQueue;
pub use settings::{DispatchConfig, DispatchSettings};
pub use task::{Task, TaskSubmitter};
