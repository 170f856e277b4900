//! Metric storage for the collector service.
//!
//! Two interchangeable backends implement [`Storage`]:
//! [`memory::MemStorage`], a locked in-process map with a JSON checkpoint
//! file, and [`db::DbStorage`], gauge and counter tables behind SeaORM with
//! retries on transient connection errors. [`open_storage`] picks one once
//! at startup.

pub mod db;
pub mod entities;
pub mod error;
pub mod memory;


use async_trait::async_trait;
use db::DbStorage;
use error::Result;
use memory::{MemOptions, MemStorage};
use metrika_common::types::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Typed metric store shared by all request handlers.
///
/// Counters accumulate deltas, gauges are last-write-wins. A counter and a
/// gauge with the same name are distinct entries. Reads of absent names
/// return `Ok(None)`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Adds `delta` to the named counter and returns the new total.
    async fn update_counter(&self, name: &str, delta: i64) -> Result<i64>;

    /// Replaces the named gauge and returns the stored value.
    async fn update_gauge(&self, name: &str, value: f64) -> Result<f64>;

    async fn counter(&self, name: &str) -> Result<Option<i64>>;

    async fn gauge(&self, name: &str) -> Result<Option<f64>>;

    /// Full store contents, used by the metrics listing.
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Checks that the backend can serve requests.
    async fn ping(&self) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Startup parameters for [`open_storage`].
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Relational connection string. Non-empty selects [`DbStorage`].
    pub database_dsn: Option<String>,
    pub file_storage_path: String,
    /// Zero means checkpoint after every mutation.
    pub store_interval: Duration,
    pub restore: bool,
}

/// A constructed backend plus its background checkpoint task, if any.
pub struct OpenedStorage {
    pub storage: Arc<dyn Storage>,
    pub checkpointer: Option<JoinHandle<()>>,
}

/// Builds the configured backend.
///
/// The checkpoint task stops (after a final write) once `shutdown` is
/// cancelled.
pub async fn open_storage(
    opts: &StorageOptions,
    shutdown: CancellationToken,
) -> Result<OpenedStorage> {
    let dsn = opts
        .database_dsn
        .as_deref()
        .map(str::trim)
        .filter(|dsn| !dsn.is_empty());

    match dsn {
        Some(dsn) => {
            let db = DbStorage::connect(dsn).await?;
            tracing::info!(backend = db.backend(), "Storage initialized");
            Ok(OpenedStorage {
                storage: Arc::new(db),
                checkpointer: None,
            })
        }
        None => {
            let mem = Arc::new(MemStorage::open(&MemOptions {
                file_storage_path: opts.file_storage_path.clone(),
                store_interval: opts.store_interval,
                restore: opts.restore,
            }));
            let checkpointer = mem.spawn_checkpointer(shutdown);
            tracing::info!(
                backend = mem.backend(),
                checkpoint = ?mem.mode(),
                "Storage initialized"
            );
            Ok(OpenedStorage {
                storage: mem,
                checkpointer,
            })
        }
    }
}
