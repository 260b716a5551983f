//! Reconciliation engine
//!
//! Converges the supervised processes onto the registry's desired state.
//! Each stream ID owns one slot; every operation on a stream holds its slot
//! lock, so two callers can never race to create or replace the same unit.
//! Different streams are independent and are synced in parallel during a
//! full pass, bounded by a semaphore.
//!
//! Syncs driven by the registry re-read the stream's entry while holding the
//! slot lock. Whichever sync runs last therefore applies the latest stored
//! configuration, however registry writes and passes interleave.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::process::{StreamError, StreamProcess, StreamStatus};
use crate::registry::{RegistryError, StoredStream, StreamStore};
use crate::stream::{StreamConfig, ValidationError};
use crate::supervisor::{ProcessBackend, SupervisorError};

use super::config::EngineConfig;
use super::report::{ReconcileFailure, ReconcileReport, StatusSummary};

type Slot = Arc<tokio::sync::Mutex<Option<StreamProcess>>>;

/// Owner of every stream process for one provider
pub struct ReconcileEngine {
    provider: String,
    store: Arc<StreamStore>,
    backend: Arc<dyn ProcessBackend>,
    config: EngineConfig,

    /// Stream ID to its process slot
    slots: Mutex<HashMap<String, Slot>>,

    /// Bounds concurrent syncs during a full pass
    permits: Arc<Semaphore>,

    /// Failures of the most recent full pass
    failures: RwLock<Vec<ReconcileFailure>>,
}

impl ReconcileEngine {
    /// Create an engine for `provider`
    pub fn new(
        provider: impl Into<String>,
        store: Arc<StreamStore>,
        backend: Arc<dyn ProcessBackend>,
        config: EngineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        Self {
            provider: provider.into(),
            store,
            backend,
            config,
            slots: Mutex::new(HashMap::new()),
            permits,
            failures: RwLock::new(Vec::new()),
        }
    }

    /// Provider this engine reconciles
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Registry the desired state is read from
    pub fn store(&self) -> &Arc<StreamStore> {
        &self.store
    }

    /// Process backend
    pub fn backend(&self) -> &Arc<dyn ProcessBackend> {
        &self.backend
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of stream IDs the engine currently tracks
    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, id: &str) -> Slot {
        self.slots.lock().entry(id.to_string()).or_default().clone()
    }

    fn existing_slot(&self, id: &str) -> Option<Slot> {
        self.slots.lock().get(id).cloned()
    }

    fn slot_snapshot(&self) -> Vec<Slot> {
        self.slots.lock().values().cloned().collect()
    }

    /// Drop an empty slot from the map if no one else holds it
    fn release_slot(&self, id: &str, slot: Slot) {
        let mut slots = self.slots.lock();
        let idle = Arc::strong_count(&slot) == 2
            && slot.try_lock().map(|held| held.is_none()).unwrap_or(false);
        if idle && slots.get(id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            slots.remove(id);
        }
    }

    /// Converge everything onto the registry
    ///
    /// Streams that are supervised but no longer desired are removed. Every
    /// desired stream is then synced; a failure is recorded against its
    /// stream and never stops the others. An entry that does not decode is
    /// such a failure too. The failure list is kept and can be read back
    /// with [`startup_failures`](Self::startup_failures).
    pub async fn reconcile_all(self: &Arc<Self>) -> Result<ReconcileReport, RegistryError> {
        let desired = self.store.entries(&self.provider).await?;
        let desired_ids: HashSet<&str> = desired.iter().map(StoredStream::id).collect();

        tracing::info!(
            provider = %self.provider,
            desired = desired.len(),
            "Reconciling streams"
        );

        let mut report = ReconcileReport {
            desired: desired.len(),
            ..Default::default()
        };

        for id in self.known_ids().await {
            if desired_ids.contains(id.as_str()) {
                continue;
            }
            match self.remove_orphan(&id).await {
                Ok(true) => {
                    tracing::info!(stream = %id, "Removed stream no longer in registry");
                    report.removed.push(id);
                }
                Ok(false) => {
                    tracing::debug!(stream = %id, "Stream was added during the pass, keeping it");
                }
                Err(e) => {
                    tracing::warn!(stream = %id, error = %e, "Failed to remove orphaned stream");
                }
            }
        }

        let mut failures = Vec::new();
        let mut tasks = JoinSet::new();
        for (index, entry) in desired.iter().cloned().enumerate() {
            let config = match entry {
                StoredStream::Config(config) => config,
                StoredStream::Unreadable(bad) => {
                    failures.push((index, ReconcileFailure::unreadable(&bad)));
                    continue;
                }
            };
            let engine = Arc::clone(self);
            let permits = Arc::clone(&self.permits);

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = engine.sync_stored(&config.id).await;
                (index, config, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(Some(_)))) => report.converged += 1,
                Ok((_, config, Ok(None))) => {
                    tracing::debug!(stream = %config.id, "Stream deleted during the pass");
                }
                Ok((index, config, Err(e))) => {
                    failures.push((index, ReconcileFailure::new(&config, e)));
                }
                Err(e) => tracing::error!(error = %e, "Stream sync task panicked"),
            }
        }
        failures.sort_by_key(|(index, _)| *index);
        report.failures = failures.into_iter().map(|(_, f)| f).collect();

        if report.is_clean() {
            tracing::info!(
                provider = %self.provider,
                converged = report.converged,
                removed = report.removed.len(),
                "Reconcile complete"
            );
        } else {
            for failure in &report.failures {
                tracing::error!(
                    stream = %failure.id,
                    summary = %failure.summary,
                    error = %failure.error,
                    "Stream did not converge"
                );
            }
            tracing::warn!(
                provider = %self.provider,
                converged = report.converged,
                failed = report.failures.len(),
                "Reconcile finished with failures"
            );
        }

        *self.failures.write() = report.failures.clone();
        Ok(report)
    }

    /// Remove a stream found running but missing from the pass's snapshot
    ///
    /// The registry is checked again under the slot lock; a stream stored
    /// since the snapshot was taken is left alone. Returns whether the
    /// stream was removed.
    async fn remove_orphan(&self, id: &str) -> Result<bool, StreamError> {
        let slot = self.slot(id);
        let removed = {
            let mut current = slot.lock().await;
            match self.store.entry(id, &self.provider).await {
                Ok(Some(_)) => Ok(false),
                Ok(None) => self
                    .remove_locked(id, &mut current)
                    .await
                    .map(|()| true)
                    .map_err(StreamError::from),
                Err(e) => Err(StreamError::from(e)),
            }
        };

        self.release_slot(id, slot);
        removed
    }

    /// IDs the backend supervises plus IDs with a live process slot
    async fn known_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();

        match self.backend.supervised_ids().await {
            Ok(supervised) => ids.extend(supervised),
            Err(e) => {
                tracing::warn!(error = %e, "Could not list supervised streams");
            }
        }

        let slots: Vec<(String, Slot)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        for (id, slot) in slots {
            if slot.lock().await.is_some() {
                ids.insert(id);
            }
        }

        ids
    }

    /// Bring one stream to the state its configuration asks for
    ///
    /// Any existing process is stopped first. An enabled stream is then
    /// recreated and started; a disabled one keeps an autostart-off
    /// definition on disk. An invalid configuration fails before anything
    /// is touched.
    pub async fn sync_one(&self, config: &StreamConfig) -> Result<(), StreamError> {
        let slot = self.slot(&config.id);
        let result = {
            let mut current = slot.lock().await;
            self.sync_locked(config, &mut current).await
        };

        self.release_slot(&config.id, slot);
        result
    }

    /// Sync one stream to its current registry entry
    ///
    /// The entry is read while the slot lock is held. Returns the
    /// configuration that was applied, or `None` if the stream is no longer
    /// stored (it is left to the delete that removed it).
    pub async fn sync_stored(&self, id: &str) -> Result<Option<StreamConfig>, StreamError> {
        let slot = self.slot(id);
        let synced = {
            let mut current = slot.lock().await;
            self.sync_entry(id, &mut current).await
        };

        self.release_slot(id, slot);
        synced
    }

    async fn sync_entry(
        &self,
        id: &str,
        current: &mut Option<StreamProcess>,
    ) -> Result<Option<StreamConfig>, StreamError> {
        match self.store.entry(id, &self.provider).await? {
            Some(entry) => {
                let config = entry.into_config()?;
                self.sync_locked(&config, current).await?;
                Ok(Some(config))
            }
            None => {
                tracing::debug!(stream = %id, "Stream no longer stored, nothing to sync");
                Ok(None)
            }
        }
    }

    async fn sync_locked(
        &self,
        config: &StreamConfig,
        current: &mut Option<StreamProcess>,
    ) -> Result<(), StreamError> {
        let mut process =
            StreamProcess::new(config.clone(), Arc::clone(&self.backend), self.config.timing())?;

        match current.take() {
            Some(mut existing) => {
                if let Err(e) = existing.stop().await {
                    tracing::warn!(stream = %config.id, error = %e, "Failed to stop previous process");
                }
            }
            None => self.clear_unit(&config.id).await,
        }

        let result = if config.enabled {
            process.start().await
        } else {
            process.park().await.map_err(StreamError::from)
        };

        *current = Some(process);
        result
    }

    /// Stop and deregister a unit this engine has no process for
    ///
    /// Covers units left running by an earlier run of the service.
    async fn clear_unit(&self, id: &str) {
        if let Err(e) = self.backend.stop(id).await {
            tracing::debug!(stream = %id, error = %e, "No previous unit to stop");
        }
        if let Err(e) = self.backend.remove(id).await {
            tracing::debug!(stream = %id, error = %e, "No previous unit to remove");
        }
    }

    /// Stop a stream and delete its unit definition
    pub async fn remove_stream(&self, id: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(id);
        let result = {
            let mut current = slot.lock().await;
            self.remove_locked(id, &mut current).await
        };

        self.release_slot(id, slot);
        result
    }

    async fn remove_locked(
        &self,
        id: &str,
        current: &mut Option<StreamProcess>,
    ) -> Result<(), SupervisorError> {
        match current.take() {
            Some(mut process) => {
                if let Err(e) = process.destroy().await {
                    *current = Some(process);
                    return Err(e);
                }
                Ok(())
            }
            None => {
                let stopped = self.backend.stop(id).await;
                let removed = self.backend.remove(id).await;
                let deleted = self.backend.delete_definition(id).await;
                stopped.and(removed).and(deleted)?;

                tracing::info!(stream = %id, "Stream unit removed");
                Ok(())
            }
        }
    }

    /// Current status of one stream, if the engine has a process for it
    pub async fn status(&self, id: &str) -> Option<StreamStatus> {
        let slot = self.existing_slot(id)?;
        let current = slot.lock().await;
        match current.as_ref() {
            Some(process) => Some(process.status().await),
            None => None,
        }
    }

    /// Status of a configured stream the engine holds no process for
    ///
    /// Read-only: builds the stream's pipeline and asks the backend about
    /// its unit without touching it.
    pub async fn probe(&self, config: &StreamConfig) -> Result<StreamStatus, ValidationError> {
        let process =
            StreamProcess::new(config.clone(), Arc::clone(&self.backend), self.config.timing())?;
        Ok(process.status().await)
    }

    /// Status of every stream the engine has a process for
    pub async fn status_all(&self) -> StatusSummary {
        let mut statuses = Vec::new();
        for slot in self.slot_snapshot() {
            let current = slot.lock().await;
            if let Some(process) = current.as_ref() {
                statuses.push(process.status().await);
            }
        }

        statuses.into_iter().collect()
    }

    /// Failures recorded by the most recent full pass
    pub fn startup_failures(&self) -> Vec<ReconcileFailure> {
        self.failures.read().clone()
    }

    /// Stop every stream, keeping definitions on disk
    ///
    /// Covers configured streams this engine has not started itself, so a
    /// fresh engine can stop units left by an earlier run.
    pub async fn shutdown(&self) {
        match self.store.list_all(&self.provider).await {
            Ok(configs) => {
                for config in configs {
                    let slot = self.slot(&config.id);
                    let mut current = slot.lock().await;
                    if current.is_some() {
                        continue;
                    }
                    let id = config.id.clone();
                    match StreamProcess::new(config, Arc::clone(&self.backend), self.config.timing())
                    {
                        Ok(process) => *current = Some(process),
                        Err(e) => {
                            tracing::debug!(stream = %id, error = %e, "Not stopping unbuildable stream")
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not read registry, stopping known streams only");
            }
        }

        let mut stopped = 0usize;

        for slot in self.slot_snapshot() {
            let mut current = slot.lock().await;
            if let Some(process) = current.as_mut() {
                match process.stop().await {
                    Ok(()) => stopped += 1,
                    Err(e) => {
                        tracing::warn!(stream = %process.id(), error = %e, "Failed to stop stream");
                    }
                }
            }
        }

        tracing::info!(provider = %self.provider, stopped = stopped, "Engine shut down");
    }
}
