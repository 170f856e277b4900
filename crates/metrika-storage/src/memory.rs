use crate::error::Result;
use crate::Storage;
use async_trait::async_trait;
use metrika_common::settings::MAX_INTERVAL;
use metrika_common::types::Snapshot;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

/// Construction parameters for [`MemStorage::open`].
#[derive(Debug, Clone, Default)]
pub struct MemOptions {
    /// Empty disables checkpointing. A path without an extension gets `.json`.
    pub file_storage_path: String,
    pub store_interval: Duration,
    pub restore: bool,
}

/// When the checkpoint file is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Disabled,
    /// After every mutation, off the caller's path.
    Sync,
    Periodic(Duration),
}

/// In-process metric store with an optional JSON checkpoint file.
///
/// One lock guards the map. Checkpoint writes copy the snapshot under that
/// lock and release it before touching the file; a second lock serializes
/// the file writes themselves.
pub struct MemStorage {
    metrics: Mutex<Snapshot>,
    checkpoint_path: Option<PathBuf>,
    mode: CheckpointMode,
    dirty: Notify,
    file_lock: Mutex<()>,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::with_snapshot(Snapshot::default(), None, CheckpointMode::Disabled)
    }
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the store, restoring from the checkpoint file when asked.
    ///
    /// A missing or unparsable checkpoint is not an error: the store starts
    /// empty and a warning is logged.
    pub fn open(opts: &MemOptions) -> Self {
        let checkpoint_path = checkpoint_path(&opts.file_storage_path);
        let mode = match &checkpoint_path {
            None => CheckpointMode::Disabled,
            Some(_) if opts.store_interval.is_zero() => CheckpointMode::Sync,
            Some(_) => CheckpointMode::Periodic(opts.store_interval),
        };

        let initial = match (&checkpoint_path, opts.restore) {
            (Some(path), true) => load_checkpoint(path).unwrap_or_default(),
            _ => Snapshot::default(),
        };

        Self::with_snapshot(initial, checkpoint_path, mode)
    }

    fn with_snapshot(
        initial: Snapshot,
        checkpoint_path: Option<PathBuf>,
        mode: CheckpointMode,
    ) -> Self {
        Self {
            metrics: Mutex::new(initial),
            checkpoint_path,
            mode,
            dirty: Notify::new(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> CheckpointMode {
        self.mode
    }

    pub fn checkpoint_file(&self) -> Option<&Path> {
        self.checkpoint_path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark_dirty(&self) {
        if self.mode == CheckpointMode::Sync {
            self.dirty.notify_one();
        }
    }

    pub fn apply_counter(&self, name: &str, delta: i64) -> i64 {
        let total = self.lock().apply_counter(name, delta);
        self.mark_dirty();
        total
    }

    pub fn apply_gauge(&self, name: &str, value: f64) -> f64 {
        let stored = self.lock().apply_gauge(name, value);
        self.mark_dirty();
        stored
    }

    pub fn read_counter(&self, name: &str) -> Option<i64> {
        self.lock().counter.get(name).copied()
    }

    pub fn read_gauge(&self, name: &str) -> Option<f64> {
        self.lock().gauge.get(name).copied()
    }

    pub fn to_snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    /// Truncates and rewrites the checkpoint file with the current contents.
    /// No-op when checkpointing is disabled.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(path) = self.checkpoint_path.as_deref() else {
            return Ok(());
        };
        let snapshot = self.to_snapshot();
        let data = serde_json::to_vec(&snapshot)?;

        let _guard = self
            .file_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::fs::write(path, data)?;
        tracing::debug!(path = %path.display(), metrics = snapshot.len(), "Checkpoint written");
        Ok(())
    }

    async fn checkpoint_blocking(self: &Arc<Self>) {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.checkpoint()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Checkpoint write failed"),
            Err(e) => tracing::error!(error = %e, "Checkpoint task panicked"),
        }
    }

    /// Starts the background writer for the configured mode. Returns `None`
    /// when checkpointing is disabled.
    pub fn spawn_checkpointer(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if self.mode == CheckpointMode::Disabled {
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run_checkpointer(shutdown).await }))
    }

    async fn run_checkpointer(self: Arc<Self>, shutdown: CancellationToken) {
        match self.mode {
            CheckpointMode::Disabled => return,
            CheckpointMode::Sync => loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.dirty.notified() => self.checkpoint_blocking().await,
                }
            },
            CheckpointMode::Periodic(period) => {
                let period = period.min(MAX_INTERVAL);
                let mut tick = interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tick.tick() => self.checkpoint_blocking().await,
                    }
                }
            }
        }

        self.checkpoint_blocking().await;
        tracing::info!("Final checkpoint written, checkpointer stopped");
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn update_counter(&self, name: &str, delta: i64) -> Result<i64> {
        Ok(self.apply_counter(name, delta))
    }

    async fn update_gauge(&self, name: &str, value: f64) -> Result<f64> {
        Ok(self.apply_gauge(name, value))
    }

    async fn counter(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.read_counter(name))
    }

    async fn gauge(&self, name: &str) -> Result<Option<f64>> {
        Ok(self.read_gauge(name))
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.to_snapshot())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Resolves the configured checkpoint path.
///
/// ```
/// use metrika_storage::memory::checkpoint_path;
/// use std::path::PathBuf;
///
/// assert_eq!(checkpoint_path(""), None);
/// assert_eq!(checkpoint_path("/tmp/db"), Some(PathBuf::from("/tmp/db.json")));
/// assert_eq!(checkpoint_path("/tmp/db.dat"), Some(PathBuf::from("/tmp/db.dat")));
/// ```
pub fn checkpoint_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let path = PathBuf::from(raw);
    if path.extension().is_some() {
        Some(path)
    } else {
        Some(PathBuf::from(format!("{raw}.json")))
    }
}

fn load_checkpoint(path: &Path) -> Option<Snapshot> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Checkpoint not readable, starting empty");
            return None;
        }
    };
    if content.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Snapshot>(&content) {
        Ok(snapshot) => {
            tracing::info!(path = %path.display(), metrics = snapshot.len(), "Restored metrics from checkpoint");
            Some(snapshot)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Checkpoint is not valid JSON, starting empty");
            None
        }
    }
}
