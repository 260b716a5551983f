//! Stream service facade
//!
//! The operations a request handler or the CLI calls. Each mutation writes
//! the registry first, then syncs the affected stream through the engine.
//! Mutations on one stream ID are serialized across both steps, and every
//! sync applies the entry as stored when it runs, so the running process
//! always ends up matching the last stored configuration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::engine::{ReconcileEngine, ReconcileFailure, ReconcileReport, StatusSummary};
use crate::process::StreamStatus;
use crate::registry::StreamStore;
use crate::stream::{StreamConfig, StreamPatch};
use crate::supervisor::build_backend;

use super::error::ApiError;

/// Result type for service calls
pub type Result<T> = std::result::Result<T, ApiError>;

/// Stream management entry point for one provider
pub struct StreamService {
    engine: Arc<ReconcileEngine>,

    /// Per-stream-ID request locks
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StreamService {
    /// Wrap an engine
    pub fn new(engine: Arc<ReconcileEngine>) -> Self {
        Self {
            engine,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Compose the store, backend and engine described by `config`
    pub fn from_config(config: &AppConfig) -> crate::Result<Self> {
        config.validate()?;

        let store = Arc::new(StreamStore::new(config.registry.clone()));
        let backend = build_backend(&config.supervisor);
        let engine = ReconcileEngine::new(
            config.registry.default_provider.clone(),
            store,
            backend,
            config.engine.clone(),
        );

        tracing::debug!(
            provider = %config.registry.default_provider,
            backend = engine.backend().name(),
            "Stream service composed"
        );

        Ok(Self::new(Arc::new(engine)))
    }

    /// Underlying engine
    pub fn engine(&self) -> &Arc<ReconcileEngine> {
        &self.engine
    }

    /// Provider this service manages
    pub fn provider(&self) -> &str {
        self.engine.provider()
    }

    fn store(&self) -> &StreamStore {
        self.engine.store()
    }

    /// Run `work` holding the request lock for `id`
    ///
    /// The lock entry is dropped again once no other request is waiting on
    /// it.
    async fn serialized<F, T>(&self, id: &str, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self.locks.lock().entry(id.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            work.await
        };

        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 && locks.get(id).is_some_and(|l| Arc::ptr_eq(l, &lock)) {
            locks.remove(id);
        }
        result
    }

    /// Request locks currently held or awaited
    pub fn pending_locks(&self) -> usize {
        self.locks.lock().len()
    }

    /// Converge on the registry at startup
    ///
    /// The failures are kept for [`startup_failures`](Self::startup_failures).
    pub async fn initialize(&self) -> Result<ReconcileReport> {
        Ok(self.engine.reconcile_all().await?)
    }

    /// All configured streams
    pub async fn list(&self) -> Result<Vec<StreamConfig>> {
        Ok(self.store().list_all(self.provider()).await?)
    }

    /// One configured stream
    pub async fn get(&self, id: &str) -> Result<StreamConfig> {
        self.store()
            .get_by_id(id, self.provider())
            .await?
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    /// Add a stream and start it if enabled
    ///
    /// A start failure is returned to the caller, but the stream stays
    /// configured (in ERROR) so it can be corrected with an update.
    pub async fn create(&self, config: StreamConfig) -> Result<StreamConfig> {
        let mut streams = self.store().add(config, self.provider()).await?;
        let created = streams
            .pop()
            .ok_or_else(|| ApiError::Internal("registry returned no streams after add".into()))?;

        self.serialized(&created.id, self.engine.sync_stored(&created.id))
            .await?;
        Ok(created)
    }

    /// Merge `patch` into a stream and resync it
    pub async fn update(&self, id: &str, patch: StreamPatch) -> Result<StreamConfig> {
        self.serialized(id, async {
            let streams = self.store().update(id, patch, self.provider()).await?;
            let updated = streams
                .into_iter()
                .find(|s| s.id == id)
                .ok_or_else(|| ApiError::NotFound(id.to_string()))?;

            self.engine.sync_stored(id).await?;
            Ok::<_, ApiError>(updated)
        })
        .await
    }

    /// Delete a stream and remove its process
    ///
    /// The registry delete is authoritative. If the unit cannot be removed
    /// now, the next reconcile removes it as an orphan.
    pub async fn delete(&self, id: &str) -> Result<Vec<StreamConfig>> {
        self.serialized(id, async {
            let streams = self.store().delete(id, self.provider()).await?;
            if let Err(e) = self.engine.remove_stream(id).await {
                tracing::warn!(stream = %id, error = %e, "Stream deleted but its unit was not removed");
            }

            Ok::<_, ApiError>(streams)
        })
        .await
    }

    /// Replace every stream and reconcile
    pub async fn replace_all(
        &self,
        configs: Vec<StreamConfig>,
    ) -> Result<(Vec<StreamConfig>, ReconcileReport)> {
        let streams = self.store().replace_all(configs, self.provider()).await?;
        let report = self.engine.reconcile_all().await?;

        Ok((streams, report))
    }

    /// Runtime status of one stream
    pub async fn status(&self, id: &str) -> Result<StreamStatus> {
        if let Some(status) = self.engine.status(id).await {
            return Ok(status);
        }

        let config = self.get(id).await?;
        Ok(self.engine.probe(&config).await?)
    }

    /// Runtime status of every configured stream
    pub async fn status_all(&self) -> Result<StatusSummary> {
        let mut statuses = Vec::new();

        for config in self.list().await? {
            if let Some(status) = self.engine.status(&config.id).await {
                statuses.push(status);
                continue;
            }
            match self.engine.probe(&config).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    tracing::warn!(stream = %config.id, error = %e, "Skipping unbuildable stream")
                }
            }
        }

        Ok(statuses.into_iter().collect())
    }

    /// Failures of the most recent full reconcile
    pub fn startup_failures(&self) -> Vec<ReconcileFailure> {
        self.engine.startup_failures()
    }

    /// Stop every stream the engine runs
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
