pub mod command;
pub mod lifecycle;
pub mod publisher;
pub mod relay;
pub mod state;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::AreaRegistry;
use crate::simulation::ReadingGenerator;
use crate::transport::{Topics, Transport, TransportFactory};

pub use command::{CommandOutcome, CommandProcessor};
pub use lifecycle::Lifecycle;
pub use publisher::{PublishLoop, TickReport, FLOOD_PASSES};
pub use relay::RelayManager;
pub use state::{AreaSlot, AreaSlots, TickInterval};

/// Everything the two simulator tasks share, built once per process
#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub registry: Arc<AreaRegistry>,
    pub slots: Arc<AreaSlots>,
    pub relays: Arc<RelayManager>,
    pub generator: Arc<ReadingGenerator>,
    pub processor: Arc<CommandProcessor>,
    pub transport: Arc<dyn Transport>,
    pub interval: Arc<TickInterval>,
    pub topics: Topics,
    pub run_id: Uuid,
}

impl AppState {
    pub fn new(cfg: Config) -> Result<Self> {
        let client_id = cfg.transport.client_id(&cfg.simulation.building_id);
        let transport = TransportFactory::new(cfg.transport.clone(), client_id).create();
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let registry = Arc::new(cfg.registry()?);
        let slots = Arc::new(AreaSlots::new(&registry));

        for (area, mode) in cfg.simulation.initial_modes(&registry)? {
            slots.set_mode(&area, mode)?;
            info!(area = %area, mode = %mode, "initial mode applied");
        }

        let relays = Arc::new(RelayManager::new(slots.clone()));
        let interval = Arc::new(TickInterval::new(cfg.simulation.interval_seconds));
        let generator = Arc::new(ReadingGenerator::new(
            cfg.simulation.generator_config()?,
            slots.clone(),
        ));
        let processor = Arc::new(CommandProcessor::new(
            slots.clone(),
            relays.clone(),
            interval.clone(),
        ));
        let topics = Topics::new(cfg.simulation.topic_prefix.clone());

        Ok(Self {
            cfg,
            registry,
            slots,
            relays,
            generator,
            processor,
            transport,
            interval,
            topics,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn publisher(&self) -> PublishLoop {
        PublishLoop::new(
            self.registry.clone(),
            self.slots.clone(),
            self.generator.clone(),
            self.transport.clone(),
            self.topics.clone(),
            self.cfg.transport.qos(),
            self.interval.clone(),
            self.publish_timeout(),
        )
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(
            self.transport.clone(),
            self.processor.clone(),
            self.slots.clone(),
            self.topics.clone(),
            self.cfg.transport.qos(),
            self.cfg.simulation.building_id.clone(),
            self.run_id,
            Duration::from_secs(self.cfg.transport.connect_retry_seconds.max(1)),
            self.publish_timeout(),
        )
    }

    fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.transport.publish_timeout_ms.max(1))
    }
}

pub struct SimulatorTasks {
    pub publisher: JoinHandle<()>,
    pub lifecycle: JoinHandle<()>,
}

impl SimulatorTasks {
    /// Wait for both tasks after their token was cancelled
    pub async fn join(self) {
        if let Err(e) = self.publisher.await {
            warn!(error = %e, "publish loop task failed");
        }
        if let Err(e) = self.lifecycle.await {
            warn!(error = %e, "lifecycle task failed");
        }
    }
}

/// Spawn the periodic publisher and the inbound command handler
pub fn spawn_simulator_tasks(state: &AppState, cancel: CancellationToken) -> SimulatorTasks {
    let publisher = state.publisher();
    let publisher_cancel = cancel.clone();
    let publisher = tokio::spawn(async move {
        publisher.run(publisher_cancel).await;
    });

    let lifecycle = state.lifecycle();
    let lifecycle = tokio::spawn(async move {
        lifecycle.run(cancel).await;
    });

    SimulatorTasks {
        publisher,
        lifecycle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SimMode;
    use crate::transport::LoopbackTransport;

    #[test]
    fn test_app_state_applies_initial_mode() {
        let mut cfg = Config::default();
        cfg.simulation.initial_mode = Some("night_anomaly".into());
        cfg.simulation.anomaly_area = Some("sala_servidores".into());

        let state = AppState::with_transport(cfg, Arc::new(LoopbackTransport::new())).unwrap();
        assert_eq!(state.slots.mode("sala_servidores").unwrap(), SimMode::NightAnomaly);
        assert_eq!(state.slots.mode("biblioteca").unwrap(), SimMode::Normal);
        assert_eq!(state.interval.seconds(), 30.0);
    }

    #[test]
    fn test_app_state_rejects_unknown_initial_mode() {
        let mut cfg = Config::default();
        cfg.simulation.initial_mode = Some("chaos".into());
        assert!(AppState::with_transport(cfg, Arc::new(LoopbackTransport::new())).is_err());
    }
}
