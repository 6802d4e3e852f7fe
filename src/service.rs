use crate::bus::Bus;
use crate::config::FabricConfig;
use crate::runtime::{AsyncRuntime, ThreadScheduler};
use crate::utils::config_io::load_cfg;
use anyhow::Context;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

/// Owner of the runtime and the bus.
///
/// Brings the fabric up as logging, then runtime, then bus, and down in the
/// reverse order. Both directions are idempotent.
#[derive(Default)]
pub struct InfraService {
    state: Mutex<Option<Started>>,
}

struct Started {
    runtime: Arc<AsyncRuntime>,
    bus: Arc<Bus>,
    log_guard: Option<WorkerGuard>,
}

impl InfraService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(
        &self,
        cfg: &FabricConfig,
        scheduler: Option<Arc<dyn ThreadScheduler>>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            tracing::debug!("[InfraService] already started");
            return Ok(());
        }

        let log_guard = match cfg.logging.as_ref() {
            Some(logging) => logging.init().context("failed to init logging")?,
            None => None,
        };

        let runtime = Arc::new(AsyncRuntime::new());
        runtime
            .init_with(&cfg.runtime, scheduler)
            .context("failed to start runtime")?;

        let bus = Arc::new(Bus::new(cfg.control.clone()));

        *state = Some(Started {
            runtime,
            bus,
            log_guard,
        });
        tracing::info!("[InfraService] started");
        Ok(())
    }

    /// `init` with the config read from `path` (format by extension).
    pub fn init_from_file(
        &self,
        path: impl AsRef<Path>,
        scheduler: Option<Arc<dyn ThreadScheduler>>,
    ) -> anyhow::Result<()> {
        let cfg: FabricConfig = load_cfg(path)?;
        self.init(&cfg, scheduler)
    }

    pub fn shutdown(&self) {
        let Some(started) = self.state.lock().take() else {
            return;
        };
        started.bus.shutdown();
        started.runtime.stop();
        tracing::info!("[InfraService] stopped");
        // Flushes the file writer, so it goes last.
        drop(started.log_guard);
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().is_some()
    }

    /// `None` until `init` succeeds.
    pub fn runtime(&self) -> Option<Arc<AsyncRuntime>> {
        self.state.lock().as_ref().map(|s| s.runtime.clone())
    }

    pub fn bus(&self) -> Option<Arc<Bus>> {
        self.state.lock().as_ref().map(|s| s.bus.clone())
    }
}

impl Drop for InfraService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
