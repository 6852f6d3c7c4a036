// packages/engine/src/engine.rs
//! Capture engine
//!
//! Owns the shared pieces (entry pool, device registry, deferred worker) and
//! hands out intercepted ports and control sessions built on them.

use crate::capture::pool::{EntryPool, PoolStats};
use crate::control::server::ControlServer;
use crate::control::session::ControlSession;
use crate::interception::deferred::{DeferredStats, DeferredWorker};
use crate::interception::pipeline::InterceptedPort;
use crate::interception::transport::PortTransport;
use crate::monitor::registry::{AcceptAll, DeviceEnumerator, DeviceRegistry, StaticEnumerator};
use crate::utils::config::EngineConfig;
use crate::utils::errors::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CaptureEngine {
    registry: Arc<DeviceRegistry>,
    pool: EntryPool,
    worker: DeferredWorker,
}

impl CaptureEngine {
    /// Build an engine whose attachable devices come from the configuration.
    /// An empty `devices.attachable` list accepts any name.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let enumerator: Arc<dyn DeviceEnumerator> = if config.devices.attachable.is_empty() {
            Arc::new(AcceptAll)
        } else {
            Arc::new(StaticEnumerator::new(config.devices.attachable.iter().cloned()))
        };

        Self::with_enumerator(config, enumerator)
    }

    pub fn with_enumerator(
        config: &EngineConfig,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = EntryPool::new(config.pool.clone());
        let registry = Arc::new(DeviceRegistry::new(
            enumerator,
            config.capture.max_entries_per_device,
        ));
        let worker = DeferredWorker::spawn(
            Arc::clone(&registry),
            pool.clone(),
            config.deferred.queue_depth,
        )?;

        info!(
            "Capture engine ready: {} entries per device, {} pooled buffers",
            config.capture.max_entries_per_device, config.pool.capacity
        );

        Ok(Self {
            registry,
            pool,
            worker,
        })
    }

    /// Attach to `name` and route its traffic through the returned port
    pub fn attach<T: PortTransport>(&self, name: &str, transport: T) -> Result<InterceptedPort<T>> {
        let state = self.registry.attach(name)?;
        Ok(InterceptedPort::new(
            state,
            transport,
            self.pool.clone(),
            self.worker.handle(),
        ))
    }

    /// Stop monitoring `name`. Ports handed out for it keep forwarding
    /// traffic but no longer capture anything.
    pub fn detach(&self, name: &str) -> Result<()> {
        self.registry.detach(name)
    }

    /// Names the enumeration service reports as attachable
    pub fn attachable_devices(&self) -> Vec<String> {
        self.registry.enumerator().enumerate()
    }

    /// Claim the control channel in-process
    pub fn open_session(&self) -> Result<ControlSession> {
        ControlSession::open(Arc::clone(&self.registry))
    }

    /// A TCP front end for the control channel
    pub fn control_server(&self) -> ControlServer {
        ControlServer::new(Arc::clone(&self.registry))
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &EntryPool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn deferred_stats(&self) -> DeferredStats {
        self.worker.stats()
    }

    /// Detach every device, stop the deferred worker and close the pool
    pub fn shutdown(&mut self) {
        for name in self.registry.list() {
            if let Err(e) = self.registry.detach(&name) {
                warn!("Failed to detach {} during shutdown: {}", name, e);
            }
        }

        self.worker.shutdown();
        self.pool.shutdown();
        info!("Capture engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::log_queue::DropReason;
    use crate::capture::record::{EventKind, MonitorMask};
    use crate::interception::transport::LoopbackTransport;
    use crate::monitor::state::RecordOutcome;
    use crate::utils::errors::EngineError;

    #[test]
    fn test_attachable_list_is_enforced() {
        let mut config = EngineConfig::default();
        config.devices.attachable = vec!["COM1".to_string(), "LPT1".to_string()];
        let engine = CaptureEngine::new(&config).unwrap();

        assert_eq!(engine.attachable_devices(), vec!["COM1", "LPT1"]);
        assert!(engine.attach("COM1", LoopbackTransport::new()).is_ok());
        assert!(matches!(
            engine.attach("COM5", LoopbackTransport::new()),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_detached_port_still_forwards() {
        let engine = CaptureEngine::new(&EngineConfig::default()).unwrap();
        let port = engine.attach("COM1", LoopbackTransport::new()).unwrap();
        port.state().configure(MonitorMask::WRITE);

        engine.detach("COM1").unwrap();
        assert_eq!(port.write(b"late").unwrap(), 4);
        assert!(port.state().pop().is_none());
        assert_eq!(engine.pool().live(), 0);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut engine = CaptureEngine::new(&EngineConfig::default()).unwrap();
        let port = engine.attach("COM1", LoopbackTransport::new()).unwrap();
        port.state().configure(MonitorMask::WRITE);
        port.write(b"abc").unwrap();
        assert_eq!(port.state().queue().len(), 1);

        engine.shutdown();
        assert!(engine.registry().is_empty());
        assert_eq!(engine.pool_stats().live, 0);
        assert!(!engine.registry().channel().is_online());
        assert_eq!(
            port.state().record(EventKind::Write, b"x", engine.pool()),
            RecordOutcome::Dropped(DropReason::Closed)
        );
    }
}
