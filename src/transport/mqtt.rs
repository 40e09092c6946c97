//! MQTT 5 adapter.
//!
//! Reconnection and backoff are delegated to the client library; this
//! adapter only translates its connection events and subscription callbacks
//! into [`TransportEvent`]s.

use async_trait::async_trait;
use mqtt5::{ConnectOptions, ConnectionEvent, MqttClient, PublishOptions, QoS, WillMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::{
    InboundMessage, OutboundMessage, Qos, SubscriptionTable, Transport, TransportEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::config::TransportConfig;
use crate::error::SimError;

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
            Qos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

pub struct MqttTransport {
    config: TransportConfig,
    client_id: String,
    client: Mutex<Option<Arc<MqttClient>>>,
    will: Mutex<Option<OutboundMessage>>,
    connected: Arc<AtomicBool>,
    /// Filters of the current broker session
    filters: Arc<Mutex<SubscriptionTable>>,
    events: broadcast::Sender<TransportEvent>,
}

impl MqttTransport {
    pub fn new(config: TransportConfig, client_id: String) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            client_id,
            client: Mutex::new(None),
            will: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            filters: Arc::new(Mutex::new(SubscriptionTable::new())),
            events,
        }
    }

    fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new(&self.client_id)
            .with_clean_start(true)
            .with_keep_alive(Duration::from_secs(self.config.keep_alive_seconds))
            .with_automatic_reconnect(true)
            .with_reconnect_delay(
                Duration::from_secs(self.config.reconnect_min_seconds),
                Duration::from_secs(self.config.reconnect_max_seconds),
            );

        if let Some(will) = self.will.lock().clone() {
            options = options.with_will(
                WillMessage::new(will.topic, will.payload)
                    .with_qos(will.qos.into())
                    .with_retain(will.retain),
            );
        }
        if let Some(username) = &self.config.username {
            let password = self.config.password.clone().unwrap_or_default();
            options = options.with_credentials(username.clone(), password);
        }
        options
    }

    fn client(&self) -> Result<Arc<MqttClient>, SimError> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| SimError::TransportUnavailable("not connected".to_string()))
    }

    fn mark_connected(connected: &AtomicBool, events: &broadcast::Sender<TransportEvent>) {
        if !connected.swap(true, Ordering::SeqCst) {
            let _ = events.send(TransportEvent::Connected);
        }
    }

    fn mark_disconnected(
        connected: &AtomicBool,
        events: &broadcast::Sender<TransportEvent>,
        reason: String,
    ) {
        if connected.swap(false, Ordering::SeqCst) {
            let _ = events.send(TransportEvent::Disconnected { reason });
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn set_last_will(&self, message: OutboundMessage) {
        *self.will.lock() = Some(message);
    }

    async fn connect(&self) -> Result<(), SimError> {
        if self.is_connected() {
            return Ok(());
        }

        let client = Arc::new(MqttClient::with_options(self.options()));

        let connected = self.connected.clone();
        let events = self.events.clone();
        let filters = self.filters.clone();
        let client_id = self.client_id.clone();
        client
            .on_connection_event(move |event| match event {
                ConnectionEvent::Connected { session_present } => {
                    info!(client_id = %client_id, session_present = %session_present, "connected to broker");
                    // Clean start: the broker forgot our subscriptions
                    filters.lock().reset();
                    MqttTransport::mark_connected(&connected, &events);
                }
                ConnectionEvent::Disconnected { reason } => {
                    warn!(client_id = %client_id, reason = ?reason, "disconnected from broker");
                    MqttTransport::mark_disconnected(&connected, &events, format!("{reason:?}"));
                }
                ConnectionEvent::Reconnecting { attempt } => {
                    info!(client_id = %client_id, attempt = %attempt, "reconnecting to broker");
                }
                ConnectionEvent::ReconnectFailed { error } => {
                    error!(client_id = %client_id, error = %error, "reconnection failed");
                }
            })
            .await
            .map_err(|e| SimError::TransportUnavailable(e.to_string()))?;

        client
            .connect(&self.config.broker_url())
            .await
            .map_err(|e| SimError::TransportUnavailable(e.to_string()))?;

        *self.client.lock() = Some(client);
        self.filters.lock().reset();
        Self::mark_connected(&self.connected, &self.events);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SimError> {
        let client = self.client.lock().take();
        if let Some(client) = client {
            client
                .disconnect()
                .await
                .map_err(|e| SimError::TransportUnavailable(e.to_string()))?;
        }
        Self::mark_disconnected(&self.connected, &self.events, "client disconnect".to_string());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), SimError> {
        let client = self.client()?;
        let options = PublishOptions {
            qos: message.qos.into(),
            retain: message.retain,
            ..Default::default()
        };
        client
            .publish_with_options(&message.topic, message.payload, options)
            .await
            .map(|_| ())
            .map_err(|e| SimError::TransportUnavailable(e.to_string()))
    }

    async fn subscribe(&self, filter: &str) -> Result<(), SimError> {
        let client = self.client()?;
        let Some(id) = self.filters.lock().insert(filter) else {
            return Ok(());
        };

        let filters = self.filters.clone();
        let events = self.events.clone();
        client
            .subscribe(filter, move |msg| {
                // Overlapping filters each get a callback; only the first
                // matching subscription of this session forwards the message.
                if filters.lock().first_match(&msg.topic) == Some(id) {
                    let _ = events.send(TransportEvent::Message(InboundMessage {
                        topic: msg.topic.clone(),
                        payload: msg.payload.clone(),
                    }));
                }
            })
            .await
            .map(|_| ())
            .map_err(|e| {
                self.filters.lock().remove(id);
                SimError::TransportUnavailable(e.to_string())
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
