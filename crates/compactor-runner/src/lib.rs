//! Compactor Runner - Distributed execution engine for minify tasks
//!
//! This crate provides a bounded out-of-process worker pool, a
//! content-addressable result cache keyed by tool and option
//! fingerprints, and the batch runner that ties them together while
//! preserving submission order.

pub mod cache;
pub mod execute;
pub mod pool;
pub mod protocol;
pub mod reporter;
pub mod runner;
pub mod worker;

pub use cache::{
    CacheEntry, CacheError, CacheKey, CacheStats, Fingerprint, MinifyCache, PruneStats,
    ToolIdentity,
};
pub use execute::execute;
pub use pool::{DispatchError, PoolError, PoolOptions, WorkerCommand, WorkerPool};
pub use protocol::{WireReply, WireRequest};
pub use reporter::{CollectingReporter, RunEvent, RunReporter, TracingReporter};
pub use runner::{RunnerOptions, TaskResolution, TaskRunner};
