//! Background embedding worker
//!
//! One cooperative task per open repo. Each iteration drains up to
//! `batch_size` queue items, reads the current referent text, embeds in
//! sub-batches, upserts write-through, and deletes the processed queue
//! ids in one batch at the end. Errors back off `error_delay`; an empty
//! queue backs off `idle_delay`. Shutdown is observed between
//! iterations and during sleeps, never mid-batch, so a started upsert
//! set always completes and its queue ids are purged before exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use mempack_core::clock::Clock;
use mempack_core::content_hash;
use mempack_core::model::{EmbedKind, EmbeddingRecord};
use mempack_store::{Store, StoreError, WorkerStatus};

use crate::error::{Result, SearchError};
use crate::provider::EmbeddingProvider;

/// Worker loop tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue items pulled per iteration.
    pub batch_size: usize,
    /// Texts per provider call.
    pub embed_batch_size: usize,
    /// Backoff when the queue is empty.
    pub idle_delay: Duration,
    /// Backoff after a provider or store error.
    pub error_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            embed_batch_size: 8,
            idle_delay: Duration::from_secs(3),
            error_delay: Duration::from_secs(10),
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing queued.
    Idle,
    /// Items were embedded and/or discarded.
    Processed { embedded: usize, discarded: usize },
}

/// Queue-draining embedding worker. Owns its store handle.
pub struct EmbeddingWorker {
    store: Store,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    model: String,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl EmbeddingWorker {
    pub fn new(
        store: Store,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        model: impl Into<String>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            clock,
            config,
        }
    }

    /// Run until `shutdown` flips to true. Cancellation is observed at
    /// sleeps and between iterations.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("embedding worker started (model {})", self.model);
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_once().await {
                Ok(DrainOutcome::Processed { embedded, discarded }) => {
                    debug!("worker iteration: {embedded} embedded, {discarded} discarded");
                    continue;
                }
                Ok(DrainOutcome::Idle) => self.config.idle_delay,
                Err(e) => {
                    warn!("worker iteration failed: {e}");
                    self.config.error_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("embedding worker stopped (model {})", self.model);
    }

    /// One drain iteration. This is also the explicit "embed now" admin
    /// path, which is why a disabled provider is an error here rather
    /// than a silent skip.
    pub async fn run_once(&mut self) -> Result<DrainOutcome> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| SearchError::provider_unavailable("no provider configured"))?;

        let batch = match self.store.next_queue_batch(&self.model, self.config.batch_size) {
            Ok(batch) => batch,
            Err(e) => return Err(self.record_error(e.into())),
        };
        if batch.is_empty() {
            return Ok(DrainOutcome::Idle);
        }

        // Read referents; vanished or tombstoned ones just drop their
        // queue rows
        let mut processed_ids = Vec::with_capacity(batch.len());
        let mut work = Vec::new();
        let mut discarded = 0usize;
        for item in batch {
            match self.embedding_text(&item.workspace, item.kind, &item.item_id) {
                Ok(Some(text)) if !text.is_empty() => work.push((item, text)),
                Ok(_) => {
                    processed_ids.push(item.queue_id);
                    discarded += 1;
                }
                Err(e) => return Err(self.record_error(e)),
            }
        }

        let mut embedded = 0usize;
        for sub_batch in work.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = sub_batch.iter().map(|(_, t)| t.clone()).collect();
            let vectors = match provider.embed(texts).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    // Drop already-processed ids so completed work is
                    // not re-embedded next round
                    let _ = self.store.delete_queue_items(&processed_ids);
                    return Err(self.record_error(e));
                }
            };
            if vectors.len() != sub_batch.len() {
                let _ = self.store.delete_queue_items(&processed_ids);
                return Err(self.record_error(SearchError::embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    sub_batch.len()
                ))));
            }

            let now = self.clock.now();
            for ((item, text), vector) in sub_batch.iter().zip(vectors) {
                let record = EmbeddingRecord {
                    repo_id: item.repo_id.clone(),
                    workspace: item.workspace.clone(),
                    kind: item.kind,
                    item_id: item.item_id.clone(),
                    model: item.model.clone(),
                    content_hash: content_hash(text),
                    vector_dim: vector.len(),
                    vector,
                    created_at: now,
                    updated_at: now,
                };
                if let Err(e) = self.store.upsert_embedding(&record) {
                    let _ = self.store.delete_queue_items(&processed_ids);
                    return Err(self.record_error(e.into()));
                }
                processed_ids.push(item.queue_id);
                embedded += 1;
            }
        }

        self.store.delete_queue_items(&processed_ids)?;
        self.store.set_worker_status(&WorkerStatus {
            last_run: self.clock.now(),
            last_error: None,
            model: self.model.clone(),
        })?;
        Ok(DrainOutcome::Processed { embedded, discarded })
    }

    /// Text to embed for a queue item, or None when the referent is
    /// gone or tombstoned.
    fn embedding_text(
        &self,
        workspace: &str,
        kind: EmbedKind,
        item_id: &str,
    ) -> Result<Option<String>> {
        match kind {
            EmbedKind::Memory => match self.store.get_memory(workspace, item_id) {
                Ok(memory) if memory.is_active() => Ok(Some(memory.embedding_text())),
                Ok(_) => Ok(None),
                Err(StoreError::MemoryNotFound { .. }) => Ok(None),
                Err(e) => Err(e.into()),
            },
            EmbedKind::Chunk => match self.store.get_chunk(workspace, item_id) {
                Ok(chunk) if chunk.is_active() => Ok(Some(chunk.embedding_text().to_string())),
                Ok(_) => Ok(None),
                Err(StoreError::ChunkNotFound { .. }) => Ok(None),
                Err(e) => Err(e.into()),
            },
        }
    }

    fn record_error(&self, error: SearchError) -> SearchError {
        let status = WorkerStatus {
            last_run: self.clock.now(),
            last_error: Some(error.to_string()),
            model: self.model.clone(),
        };
        if let Err(e) = self.store.set_worker_status(&status) {
            warn!("failed to persist worker status: {e}");
        }
        error
    }
}
