//! # Pub/Sub Transport
//!
//! Thin adapter over the message broker. The simulator core only talks to
//! [`Transport`]; retained messages, last will and reconnection are the
//! adapter's contract.
//!
//! ## Implementations
//!
//! - [`LoopbackTransport`]: in-process broker double (default, tests, offline demos)
//! - `MqttTransport`: MQTT 5 client, behind the `mqtt` feature

pub mod factory;
pub mod loopback;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod subscriptions;
pub mod topics;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SimError;

pub use factory::{TransportFactory, TransportMode};
pub use loopback::LoopbackTransport;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;
pub use subscriptions::SubscriptionTable;
pub use topics::{CommandTopic, Topics};

/// Capacity of each transport's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = SimError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(SimError::Config(format!("invalid QoS level {other}"))),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: Qos) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
        }
    }

    /// Serialize `value` as the JSON payload
    pub fn json<T: Serialize>(topic: impl Into<String>, value: &T, qos: Qos) -> Result<Self, SimError> {
        Ok(Self::new(topic, serde_json::to_vec(value)?, qos))
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Message(InboundMessage),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register the message the broker publishes for us on an unclean
    /// disconnect. Takes effect on the next `connect`.
    fn set_last_will(&self, message: OutboundMessage);

    async fn connect(&self) -> Result<(), SimError>;

    async fn disconnect(&self) -> Result<(), SimError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), SimError>;

    async fn subscribe(&self, filter: &str) -> Result<(), SimError>;

    fn is_connected(&self) -> bool;

    /// New receiver for connection and inbound message events
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// MQTT-style filter match: `+` matches one level, a trailing `#` matches the rest
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Broker that accepts the session but never answers a request
#[cfg(test)]
pub(crate) struct StalledTransport {
    events: broadcast::Sender<TransportEvent>,
}

#[cfg(test)]
impl StalledTransport {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events }
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for StalledTransport {
    fn set_last_will(&self, _message: OutboundMessage) {}

    async fn connect(&self) -> Result<(), SimError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SimError> {
        std::future::pending().await
    }

    async fn publish(&self, _message: OutboundMessage) -> Result<(), SimError> {
        std::future::pending().await
    }

    async fn subscribe(&self, _filter: &str) -> Result<(), SimError> {
        std::future::pending().await
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("edificio/+/comando", "edificio/biblioteca/comando", true)]
    #[case("edificio/+/comando", "edificio/system/comando", true)]
    #[case("edificio/+/comando", "edificio/biblioteca/consumo", false)]
    #[case("edificio/+/comando", "edificio/a/b/comando", false)]
    #[case("edificio/system/comando", "edificio/system/comando", true)]
    #[case("edificio/#", "edificio/biblioteca/consumo", true)]
    #[case("edificio/#", "otro/biblioteca", false)]
    #[case("edificio/summary", "edificio/summary/x", false)]
    fn test_topic_matches(#[case] filter: &str, #[case] topic: &str, #[case] expected: bool) {
        assert_eq!(topic_matches(filter, topic), expected);
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(Qos::try_from(1).unwrap(), Qos::AtLeastOnce);
        assert!(Qos::try_from(3).is_err());
        assert_eq!(u8::from(Qos::ExactlyOnce), 2);
    }

    #[test]
    fn test_json_message() {
        let message = OutboundMessage::json("t", &serde_json::json!({"a": 1}), Qos::AtMostOnce)
            .unwrap()
            .retained();
        assert!(message.retain);
        assert_eq!(message.payload, br#"{"a":1}"#.to_vec());
    }
}
