//! In-process broker double.
//!
//! Records every publish, keeps a retained store, routes injected messages
//! to matching subscriptions and delivers the last will on a simulated crash.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    InboundMessage, OutboundMessage, SubscriptionTable, Transport, TransportEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::SimError;

pub struct LoopbackTransport {
    reachable: AtomicBool,
    connected: AtomicBool,
    published: Mutex<Vec<OutboundMessage>>,
    retained: Mutex<HashMap<String, OutboundMessage>>,
    subscriptions: Mutex<SubscriptionTable>,
    will: Mutex<Option<OutboundMessage>>,
    events: broadcast::Sender<TransportEvent>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
            retained: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(SubscriptionTable::new()),
            will: Mutex::new(None),
            events,
        }
    }

    /// Make the "broker" unreachable; an open session is dropped uncleanly
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable && self.connected.load(Ordering::SeqCst) {
            self.simulate_crash();
        }
    }

    /// Deliver an inbound message if any subscription matches. Returns whether it was routed.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        if !self.is_connected() {
            return false;
        }
        let routed = self.subscriptions.lock().first_match(topic).is_some();
        if routed {
            let _ = self.events.send(TransportEvent::Message(InboundMessage {
                topic: topic.to_string(),
                payload: payload.into(),
            }));
        }
        routed
    }

    /// Drop the session without a clean disconnect; the broker publishes the will
    pub fn simulate_crash(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.subscriptions.lock().reset();
        if let Some(will) = self.will.lock().clone() {
            self.record(will);
        }
        let _ = self.events.send(TransportEvent::Disconnected {
            reason: "connection lost".to_string(),
        });
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn retained(&self, topic: &str) -> Option<OutboundMessage> {
        self.retained.lock().get(topic).cloned()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().filters()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    fn record(&self, message: OutboundMessage) {
        if message.retain {
            self.retained
                .lock()
                .insert(message.topic.clone(), message.clone());
        }
        self.published.lock().push(message);
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn set_last_will(&self, message: OutboundMessage) {
        *self.will.lock() = Some(message);
    }

    async fn connect(&self) -> Result<(), SimError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(SimError::TransportUnavailable(
                "loopback broker unreachable".to_string(),
            ));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SimError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.subscriptions.lock().reset();
            let _ = self.events.send(TransportEvent::Disconnected {
                reason: "client disconnect".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), SimError> {
        if !self.is_connected() {
            return Err(SimError::TransportUnavailable("not connected".to_string()));
        }
        debug!(topic = %message.topic, bytes = message.payload.len(), retain = message.retain, "loopback publish");
        self.record(message);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), SimError> {
        if !self.is_connected() {
            return Err(SimError::TransportUnavailable("not connected".to_string()));
        }
        self.subscriptions.lock().insert(filter);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Qos;

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = LoopbackTransport::new();
        let message = OutboundMessage::new("a/b", b"x".to_vec(), Qos::AtMostOnce);
        assert!(matches!(
            transport.publish(message.clone()).await,
            Err(SimError::TransportUnavailable(_))
        ));

        transport.connect().await.unwrap();
        transport.publish(message).await.unwrap();
        assert_eq!(transport.published_on("a/b").len(), 1);
    }

    #[tokio::test]
    async fn test_retained_store_keeps_latest() {
        let transport = LoopbackTransport::new();
        transport.connect().await.unwrap();
        for payload in ["online", "offline"] {
            transport
                .publish(OutboundMessage::new("s", payload, Qos::AtLeastOnce).retained())
                .await
                .unwrap();
        }
        assert_eq!(transport.retained("s").unwrap().payload, b"offline".to_vec());
    }

    #[tokio::test]
    async fn test_inject_routes_to_subscribers_only() {
        let transport = LoopbackTransport::new();
        let mut events = transport.events();
        transport.connect().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected);

        assert!(!transport.inject("edificio/biblioteca/comando", b"{}".to_vec()));
        transport.subscribe("edificio/+/comando").await.unwrap();
        assert!(transport.inject("edificio/biblioteca/comando", b"{}".to_vec()));

        match events.recv().await.unwrap() {
            TransportEvent::Message(msg) => assert_eq!(msg.topic, "edificio/biblioteca/comando"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_crash_delivers_will_but_clean_disconnect_does_not() {
        let transport = LoopbackTransport::new();
        transport.set_last_will(OutboundMessage::new("s", "offline", Qos::AtLeastOnce).retained());

        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(transport.retained("s").is_none());

        transport.connect().await.unwrap();
        transport.simulate_crash();
        assert!(!transport.is_connected());
        assert_eq!(transport.retained("s").unwrap().payload, b"offline".to_vec());
    }

    #[tokio::test]
    async fn test_new_session_needs_fresh_subscriptions() {
        let transport = LoopbackTransport::new();
        transport.connect().await.unwrap();
        transport.subscribe("edificio/+/comando").await.unwrap();

        transport.simulate_crash();
        transport.connect().await.unwrap();
        assert!(transport.subscriptions().is_empty());
        assert!(!transport.inject("edificio/biblioteca/comando", b"{}".to_vec()));

        transport.subscribe("edificio/+/comando").await.unwrap();
        transport.subscribe("edificio/+/comando").await.unwrap();
        assert_eq!(transport.subscriptions().len(), 1);
        assert!(transport.inject("edificio/biblioteca/comando", b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_unreachable_broker_refuses_connect() {
        let transport = LoopbackTransport::new();
        transport.set_reachable(false);
        assert!(transport.connect().await.is_err());
        transport.set_reachable(true);
        assert!(transport.connect().await.is_ok());
    }
}
