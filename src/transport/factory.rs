use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{LoopbackTransport, Transport};
use crate::config::TransportConfig;

/// Which broker adapter to run against
///
/// `Mqtt` needs the `mqtt` feature; without it the factory falls back to
/// the loopback broker so a misconfigured build never stops simulating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// In-process broker double
    #[default]
    Loopback,
    /// MQTT 5 broker at `transport.host:transport.port`
    Mqtt,
}

/// Factory for transport adapters
pub struct TransportFactory {
    config: TransportConfig,
    client_id: String,
}

impl TransportFactory {
    pub fn new(config: TransportConfig, client_id: impl Into<String>) -> Self {
        Self {
            config,
            client_id: client_id.into(),
        }
    }

    pub fn create(&self) -> Arc<dyn Transport> {
        match self.config.mode {
            TransportMode::Loopback => {
                tracing::info!("using loopback transport, readings stay in-process");
                Arc::new(LoopbackTransport::new())
            }
            #[cfg(feature = "mqtt")]
            TransportMode::Mqtt => {
                tracing::info!(
                    broker = %self.config.broker_url(),
                    client_id = %self.client_id,
                    "using MQTT transport"
                );
                Arc::new(super::MqttTransport::new(
                    self.config.clone(),
                    self.client_id.clone(),
                ))
            }
            #[cfg(not(feature = "mqtt"))]
            TransportMode::Mqtt => {
                tracing::warn!(
                    client_id = %self.client_id,
                    "MQTT transport requested but the 'mqtt' feature is disabled, falling back to loopback"
                );
                Arc::new(LoopbackTransport::new())
            }
        }
    }
}
