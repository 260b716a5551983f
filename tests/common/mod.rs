//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use stagepi_streams::engine::{EngineConfig, ReconcileEngine};
use stagepi_streams::pipeline::PipelineDescription;
use stagepi_streams::registry::StreamStore;
use stagepi_streams::supervisor::{ProcessBackend, SupervisorError, UnitState, UnitStatus};
use stagepi_streams::{StreamConfig, StreamKind, StreamService};

/// Device that never opens
pub const BAD_DEVICE: &str = "hw:bogus";

/// Device whose process never leaves STARTING
pub const STALLED_DEVICE: &str = "hw:stalled";

/// Device whose unit cannot be applied because the supervisor is down
pub const OFFLINE_DEVICE: &str = "hw:offline";

/// Device whose status queries time out
pub const HUNG_DEVICE: &str = "hw:hung";

#[derive(Debug, Clone)]
pub struct FakeUnit {
    pub device: String,
    pub pipeline: String,
    pub autostart: bool,
    pub active: bool,
    pub running: bool,
}

/// In-memory supervisor with scripted device behaviour
#[derive(Default)]
pub struct MemoryBackend {
    units: Mutex<HashMap<String, FakeUnit>>,
    calls: Mutex<Vec<String>>,
    apply_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Backend whose `apply` takes `delay`, for observing concurrency
    pub fn with_apply_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            apply_delay: Some(delay),
            ..Default::default()
        })
    }

    /// Pretend a unit is already supervised and running
    pub fn adopt(&self, id: &str) {
        self.units.lock().insert(
            id.to_string(),
            FakeUnit {
                device: "default".into(),
                pipeline: String::new(),
                autostart: true,
                active: true,
                running: true,
            },
        );
    }

    pub fn unit(&self, id: &str) -> Option<FakeUnit> {
        self.units.lock().get(id).cloned()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.unit(id).map(|u| u.running).unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<String> {
        let suffix = format!(":{}", id);
        self.calls()
            .into_iter()
            .filter(|c| c.ends_with(&suffix))
            .map(|c| c.trim_end_matches(&suffix).to_string())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str, id: &str) {
        self.calls.lock().push(format!("{}:{}", op, id));
    }

    fn launch(unit: &mut FakeUnit) {
        unit.running = ![BAD_DEVICE, STALLED_DEVICE, OFFLINE_DEVICE, HUNG_DEVICE]
            .contains(&unit.device.as_str());
    }
}

#[async_trait]
impl ProcessBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_definition(
        &self,
        config: &StreamConfig,
        pipeline: &PipelineDescription,
        autostart: bool,
    ) -> Result<(), SupervisorError> {
        self.record(if autostart { "write-on" } else { "write-off" }, &config.id);

        let mut units = self.units.lock();
        let unit = units.entry(config.id.clone()).or_insert_with(|| FakeUnit {
            device: String::new(),
            pipeline: String::new(),
            autostart,
            active: false,
            running: false,
        });
        unit.device = config.device_or_default().to_string();
        unit.pipeline = pipeline.to_string();
        unit.autostart = autostart;
        Ok(())
    }

    async fn apply(&self, id: &str) -> Result<(), SupervisorError> {
        self.record("apply", id);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut units = self.units.lock();
        let unit = units
            .get_mut(id)
            .ok_or_else(|| SupervisorError::UnknownUnit(id.to_string()))?;
        if unit.device == OFFLINE_DEVICE {
            return Err(SupervisorError::Unavailable(
                "unix:///var/run/supervisor.sock refused connection".into(),
            ));
        }
        unit.active = true;
        if unit.autostart {
            Self::launch(unit);
        }
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), SupervisorError> {
        self.record("start", id);

        let mut units = self.units.lock();
        match units.get_mut(id) {
            Some(unit) if unit.active => {
                Self::launch(unit);
                Ok(())
            }
            _ => Err(SupervisorError::UnknownUnit(id.to_string())),
        }
    }

    async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        self.record("stop", id);
        if let Some(unit) = self.units.lock().get_mut(id) {
            unit.running = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SupervisorError> {
        self.record("remove", id);
        if let Some(unit) = self.units.lock().get_mut(id) {
            unit.active = false;
            unit.running = false;
        }
        Ok(())
    }

    async fn delete_definition(&self, id: &str) -> Result<(), SupervisorError> {
        self.record("delete", id);
        self.units.lock().remove(id);
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<UnitStatus, SupervisorError> {
        let units = self.units.lock();
        let unit = match units.get(id) {
            Some(unit) if unit.active => unit,
            _ => return Ok(UnitStatus::absent()),
        };
        if unit.device == HUNG_DEVICE {
            return Err(SupervisorError::Timeout {
                op: "status",
                after: Duration::from_secs(5),
            });
        }

        let status = if unit.running {
            UnitStatus::new(UnitState::Running, "pid 100, uptime 0:00:01")
        } else if unit.autostart && unit.device == BAD_DEVICE {
            UnitStatus::new(UnitState::Fatal, "Exited too quickly")
        } else if unit.autostart && unit.device == STALLED_DEVICE {
            UnitStatus::new(UnitState::Starting, "")
        } else {
            UnitStatus::new(UnitState::Stopped, "Not started")
        };
        Ok(status)
    }

    async fn error_tail(&self, id: &str) -> Option<String> {
        let units = self.units.lock();
        match units.get(id) {
            Some(unit) if unit.device == BAD_DEVICE => Some(
                "ERROR: from element /GstPipeline:pipeline0/GstAlsaSrc:alsasrc0: \
                 Cannot get card index for bogus: No such device"
                    .into(),
            ),
            _ => None,
        }
    }

    async fn supervised_ids(&self) -> Result<Vec<String>, SupervisorError> {
        Ok(self
            .units
            .lock()
            .iter()
            .filter(|(_, u)| u.active)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig::default()
        .poll_interval(Duration::from_millis(5))
        .start_timeout(Duration::from_millis(150))
}

pub fn sender(id: &str, port: u16) -> StreamConfig {
    StreamConfig::new(StreamKind::Sender, "239.69.0.1", port)
        .with_id(id)
        .device("hw:0,0")
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<StreamStore>,
    pub backend: Arc<MemoryBackend>,
    pub engine: Arc<ReconcileEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(MemoryBackend::new(), engine_config())
    }

    pub fn with_backend(backend: Arc<MemoryBackend>, config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StreamStore::with_dir(dir.path()));
        let engine = Arc::new(ReconcileEngine::new(
            "aes67",
            store.clone(),
            backend.clone(),
            config,
        ));

        Self {
            dir,
            store,
            backend,
            engine,
        }
    }

    pub fn service(&self) -> StreamService {
        StreamService::new(self.engine.clone())
    }

    /// A second engine over the same registry and backend, as after a restart
    pub fn restarted(&self) -> Arc<ReconcileEngine> {
        Arc::new(ReconcileEngine::new(
            "aes67",
            self.store.clone(),
            self.backend.clone(),
            engine_config(),
        ))
    }

    pub async fn seed(&self, streams: Vec<StreamConfig>) {
        self.store.replace_all(streams, "aes67").await.unwrap();
    }
}
