use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{AreaSlots, TickInterval};
use crate::domain::{round_to, AreaProfile, AreaRegistry, BatchSummary, SensorReading, SimMode};
use crate::error::SimError;
use crate::simulation::ReadingGenerator;
use crate::transport::{OutboundMessage, Qos, Topics, Transport};

/// Generation passes per tick while any area floods
pub const FLOOD_PASSES: usize = 10;

/// Counters for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub passes: usize,
    pub readings: usize,
    pub published: usize,
    pub failed: usize,
    /// Messages not attempted because the transport was down
    pub skipped: usize,
    pub summary: BatchSummary,
}

pub struct PublishLoop {
    registry: Arc<AreaRegistry>,
    slots: Arc<AreaSlots>,
    generator: Arc<ReadingGenerator>,
    transport: Arc<dyn Transport>,
    topics: Topics,
    qos: Qos,
    interval: Arc<TickInterval>,
    publish_timeout: Duration,
    building_id: String,
}

impl PublishLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AreaRegistry>,
        slots: Arc<AreaSlots>,
        generator: Arc<ReadingGenerator>,
        transport: Arc<dyn Transport>,
        topics: Topics,
        qos: Qos,
        interval: Arc<TickInterval>,
        publish_timeout: Duration,
    ) -> Self {
        let building_id = generator.config().building_id.clone();
        Self {
            registry,
            slots,
            generator,
            transport,
            topics,
            qos,
            interval,
            publish_timeout,
            building_id,
        }
    }

    /// Tick until cancelled. The sleep between ticks re-reads the interval.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            areas = self.registry.len(),
            interval_s = self.interval.seconds(),
            "publish loop started"
        );
        loop {
            let report = self.tick().await;
            debug!(
                passes = report.passes,
                readings = report.readings,
                published = report.published,
                failed = report.failed,
                skipped = report.skipped,
                "tick complete"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval.get()) => {}
            }
        }
        info!("publish loop stopped");
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let flooded: Vec<&AreaProfile> = self
            .registry
            .iter()
            .filter(|p| matches!(self.slots.mode(&p.id), Ok(SimMode::Flood)))
            .collect();
        let passes = if flooded.is_empty() { 1 } else { FLOOD_PASSES };

        let mut messages = Vec::new();
        let mut readings = 0;

        let full_pass: Vec<&AreaProfile> = self.registry.iter().collect();
        let first = self.generate_pass(&full_pass, now);
        readings += first.len();

        let total_kwh: f64 = first.iter().map(|r| r.kwh).sum();
        let summary = BatchSummary {
            building_id: self.building_id.clone(),
            total_kwh: round_to(total_kwh, 4),
            areas_reporting: first.len(),
            areas_total: self.registry.len(),
            mode: self.slots.mode_label(),
            timestamp: now,
        };
        messages.extend(first.iter().filter_map(|r| self.reading_message(r)));

        for _ in 1..passes {
            let burst = self.generate_pass(&flooded, now);
            readings += burst.len();
            messages.extend(burst.iter().filter_map(|r| self.reading_message(r)));
        }

        // Summary is queued after the readings it aggregates, in the same batch
        match OutboundMessage::json(self.topics.summary(), &summary, self.qos) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(error = %e, "failed to encode summary"),
        }
        let (published, failed, skipped) = self.publish_all(messages).await;

        info!(
            total_kwh = summary.total_kwh,
            areas_reporting = summary.areas_reporting,
            areas_total = summary.areas_total,
            mode = %summary.mode,
            "[SUMMARY] tick"
        );

        TickReport {
            passes,
            readings,
            published,
            failed,
            skipped,
            summary,
        }
    }

    fn generate_pass(&self, profiles: &[&AreaProfile], now: DateTime<Utc>) -> Vec<SensorReading> {
        profiles
            .iter()
            .filter_map(|profile| match self.generator.next_at(profile, now) {
                Ok(Some(reading)) => {
                    info!(
                        area = %reading.area,
                        kwh = reading.kwh,
                        sequence = reading.sequence,
                        quality = ?reading.quality,
                        relay = %reading.relay_state,
                        mode = %reading.mode,
                        "reading"
                    );
                    Some(reading)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(area = %profile.id, error = %e, "reading generation failed");
                    None
                }
            })
            .collect()
    }

    fn reading_message(&self, reading: &SensorReading) -> Option<OutboundMessage> {
        OutboundMessage::json(self.topics.reading(&reading.area), reading, self.qos)
            .map_err(|e| warn!(area = %reading.area, error = %e, "failed to encode reading"))
            .ok()
    }

    /// Deadline for one tick's publishes: the publish timeout, but never
    /// longer than the current interval.
    pub fn publish_budget(&self) -> Duration {
        self.publish_timeout.min(self.interval.get())
    }

    /// Publish concurrently, each bounded by the publish budget.
    ///
    /// Returns `(published, failed, skipped)`.
    async fn publish_all(&self, messages: Vec<OutboundMessage>) -> (usize, usize, usize) {
        if !self.transport.is_connected() {
            debug!(count = messages.len(), "transport down, skipping publishes");
            return (0, 0, messages.len());
        }

        let attempts = messages.into_iter().map(|message| {
            let transport = self.transport.clone();
            let timeout = self.publish_budget();
            async move {
                let topic = message.topic.clone();
                let result = match tokio::time::timeout(timeout, transport.publish(message)).await {
                    Ok(result) => result,
                    Err(_) => Err(SimError::TransportUnavailable(format!(
                        "publish timed out after {} ms",
                        timeout.as_millis()
                    ))),
                };
                if let Err(e) = &result {
                    warn!(topic = %topic, error = %e, "publish failed");
                }
                result.is_ok()
            }
        });

        let results = join_all(attempts).await;
        let published = results.iter().filter(|ok| **ok).count();
        (published, results.len() - published, 0)
    }
}
