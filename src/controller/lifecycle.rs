//! Connection lifecycle and inbound command handling.
//!
//! The last will is registered before the first connect, every (re)connect
//! republishes the retained "online" status and the command subscriptions,
//! and a controlled shutdown publishes "offline" itself before disconnecting.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::command::{CommandOutcome, CommandProcessor};
use super::state::AreaSlots;
use crate::domain::{Availability, CommandFrame, SystemStatus};
use crate::error::SimError;
use crate::transport::{InboundMessage, OutboundMessage, Qos, Topics, Transport, TransportEvent};

pub struct Lifecycle {
    transport: Arc<dyn Transport>,
    processor: Arc<CommandProcessor>,
    slots: Arc<AreaSlots>,
    topics: Topics,
    qos: Qos,
    building_id: String,
    run_id: Uuid,
    connect_retry: Duration,
    /// Bound for every broker request made here
    request_timeout: Duration,
}

impl Lifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        processor: Arc<CommandProcessor>,
        slots: Arc<AreaSlots>,
        topics: Topics,
        qos: Qos,
        building_id: impl Into<String>,
        run_id: Uuid,
        connect_retry: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            processor,
            slots,
            topics,
            qos,
            building_id: building_id.into(),
            run_id,
            connect_retry,
            request_timeout,
        }
    }

    pub fn status(&self, status: Availability) -> SystemStatus {
        SystemStatus {
            status,
            building: self.building_id.clone(),
            mode: Some(self.slots.mode_label()),
            run_id: self.run_id.to_string(),
            ts: Utc::now(),
        }
    }

    fn status_message(&self, status: Availability) -> Result<OutboundMessage, SimError> {
        Ok(OutboundMessage::json(self.topics.status(), &self.status(status), Qos::AtLeastOnce)?.retained())
    }

    /// Await a broker request for at most the request timeout
    async fn bounded<T>(
        &self,
        request: impl Future<Output = Result<T, SimError>>,
    ) -> Result<T, SimError> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SimError::TransportUnavailable(format!(
                "broker did not answer within {} ms",
                self.request_timeout.as_millis()
            ))),
        }
    }

    /// Register the retained "offline" last will
    pub fn prepare(&self) -> Result<(), SimError> {
        let will = self.status_message(Availability::Offline)?;
        self.transport.set_last_will(will);
        Ok(())
    }

    /// Connect, retrying until connected or cancelled. Returns whether connected.
    pub async fn connect_with_retry(&self, cancel: &CancellationToken) -> bool {
        loop {
            match self.transport.connect().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_s = self.connect_retry.as_secs(),
                        "broker unreachable, simulating locally"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.connect_retry) => {}
            }
        }
    }

    /// Announce "online" and (re)establish the command subscriptions
    pub async fn on_connected(&self) {
        match self.status_message(Availability::Online) {
            Ok(message) => {
                if let Err(e) = self.bounded(self.transport.publish(message)).await {
                    warn!(error = %e, "failed to publish online status");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode online status"),
        }

        for filter in self.topics.command_filters() {
            match self.bounded(self.transport.subscribe(&filter)).await {
                Ok(()) => info!(filter = %filter, "subscribed to commands"),
                Err(e) => warn!(filter = %filter, error = %e, "command subscription failed"),
            }
        }
        info!(building = %self.building_id, run_id = %self.run_id, "simulator online");
    }

    /// Decode and apply one inbound message, returning the reply to publish.
    ///
    /// Rejected commands produce no reply.
    pub fn handle_message(&self, message: &InboundMessage) -> Option<OutboundMessage> {
        let Some(command_topic) = self.topics.parse_command_topic(&message.topic) else {
            debug!(topic = %message.topic, "ignoring message on non-command topic");
            return None;
        };

        let frame = match CommandFrame::decode(&message.payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!(topic = %message.topic, error = %e, "dropping malformed command");
                return None;
            }
        };

        info!(
            topic = %message.topic,
            action = %frame.action,
            origin = %frame.origin_or_default(),
            "[CMD] received"
        );

        let outcome = match self.processor.handle(command_topic.area(), &frame) {
            Ok(outcome) => outcome,
            Err(e @ SimError::MalformedCommand(_)) => {
                error!(topic = %message.topic, error = %e, kind = e.kind(), "command rejected");
                return None;
            }
            Err(e) => {
                warn!(topic = %message.topic, error = %e, kind = e.kind(), "command rejected");
                return None;
            }
        };

        let reply = match &outcome {
            CommandOutcome::RelayAck(ack) => {
                OutboundMessage::json(self.topics.relay_ack(), ack, self.qos)
            }
            CommandOutcome::RelayStatus(report) => {
                OutboundMessage::json(self.topics.relay_status(), report, self.qos)
            }
            CommandOutcome::Config(ack) => {
                OutboundMessage::json(self.topics.config_ack(), ack, self.qos)
            }
        };

        match reply {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(error = %e, "failed to encode command reply");
                None
            }
        }
    }

    async fn dispatch(&self, message: InboundMessage) {
        if let Some(reply) = self.handle_message(&message) {
            if let Err(e) = self.bounded(self.transport.publish(reply)).await {
                warn!(error = %e, "failed to publish command reply");
            }
        }
    }

    /// Publish "offline" and disconnect, best effort
    pub async fn shutdown(&self) {
        if self.transport.is_connected() {
            match self.status_message(Availability::Offline) {
                Ok(message) => {
                    if let Err(e) = self.bounded(self.transport.publish(message)).await {
                        warn!(error = %e, "failed to publish offline status");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode offline status"),
            }
        }
        if let Err(e) = self.bounded(self.transport.disconnect()).await {
            warn!(error = %e, "disconnect failed");
        }
        info!(run_id = %self.run_id, "simulator offline");
    }

    /// Connect, serve inbound events until cancelled, then shut down cleanly
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.prepare() {
            warn!(error = %e, "failed to register last will");
        }

        let mut events = self.transport.events();
        if !self.connect_with_retry(&cancel).await {
            self.shutdown().await;
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(TransportEvent::Connected) => self.on_connected().await,
                    Ok(TransportEvent::Disconnected { reason }) => {
                        warn!(reason = %reason, "transport disconnected, publishes skipped until reconnect");
                    }
                    Ok(TransportEvent::Message(message)) => self.dispatch(message).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "event receiver lagged, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        warn!("transport event channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }
}
