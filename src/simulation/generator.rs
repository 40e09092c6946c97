//! # Reading Generator
//!
//! Produces one [`SensorReading`] per area per call. The relay gate and the
//! fault-mode overlay are read from the area's slot under the same lock that
//! advances its cursor.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::warn;

use super::environment::{apply_noise, Electrical, EnvironmentConfig, EnvironmentModel, NightWindow};
use crate::controller::state::{AreaSlot, AreaSlots};
use crate::domain::{round_to, AreaProfile, Quality, SensorReading, SimMode};
use crate::error::SimError;

pub const ANOMALY_FACTOR: f64 = 2.8;
pub const NIGHT_ANOMALY_FACTOR: f64 = 3.5;
/// Noise std used by the spike modes instead of the profile variability
pub const SPIKE_NOISE_STD: f64 = 0.05;
pub const DRIFT_STEP: f64 = 0.02;
pub const DRIFT_CAP: f64 = 3.0;
pub const DRIFT_DEGRADED_ABOVE: f64 = 1.5;

pub const TAG_RELAY_OFF: &str = "relay_off";
pub const TAG_SPIKE: &str = "spike_anomaly";
pub const TAG_NIGHT_SPIKE: &str = "night_spike";
pub const TAG_INTERMITTENT: &str = "intermittent_recovery";

/// Per-area generator bookkeeping, lives for the whole process
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorCursor {
    pub sequence: u64,
    /// Load multiplier for gradual drift; starts neutral at 1.0
    pub drift: f64,
    /// Intermittent mode: whether the next call is swallowed
    pub skip_next: bool,
}

impl Default for GeneratorCursor {
    fn default() -> Self {
        Self {
            sequence: 0,
            drift: 1.0,
            skip_next: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub building_id: String,
    pub night_window: NightWindow,
    /// Zone used for time-of-day, night window and season
    pub timezone: Tz,
    /// Random seed for reproducibility (None = random)
    pub random_seed: Option<u64>,
    pub environment: EnvironmentConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            building_id: "edificio_principal".to_string(),
            night_window: NightWindow::default(),
            timezone: chrono_tz::America::Lima,
            random_seed: None,
            environment: EnvironmentConfig::default(),
        }
    }
}

pub struct ReadingGenerator {
    config: GeneratorConfig,
    env: EnvironmentModel,
    slots: Arc<AreaSlots>,
    rng: Mutex<StdRng>,
}

impl ReadingGenerator {
    pub fn new(config: GeneratorConfig, slots: Arc<AreaSlots>) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            env: EnvironmentModel::new(config.environment.clone()),
            config,
            slots,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn is_night_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.config.timezone);
        self.config.night_window.contains(local.hour())
    }

    /// Reading for `profile` at the current time
    pub fn next(&self, profile: &AreaProfile) -> Result<Option<SensorReading>, SimError> {
        self.next_at(profile, Utc::now())
    }

    /// Reading for `profile` at `now`.
    ///
    /// `Ok(None)` means the sensor stayed silent this tick (failure or
    /// intermittent gap); callers must not substitute a zero reading.
    pub fn next_at(
        &self,
        profile: &AreaProfile,
        now: DateTime<Utc>,
    ) -> Result<Option<SensorReading>, SimError> {
        self.slots
            .with_slot(&profile.id, |slot| self.generate(slot, profile, now))
    }

    fn generate(
        &self,
        slot: &mut AreaSlot,
        profile: &AreaProfile,
        now: DateTime<Utc>,
    ) -> Option<SensorReading> {
        slot.cursor.sequence += 1;

        let local = now.with_timezone(&self.config.timezone);
        let hour = local.hour();
        let fractional_hour = hour as f64 + local.minute() as f64 / 60.0;
        let is_night = self.config.night_window.contains(hour);

        let mut rng = self.rng.lock();
        let ambient = self.env.ambient(hour, &mut *rng);

        let mut reading = SensorReading {
            area: profile.id.clone(),
            kwh: 0.0,
            timestamp: now,
            mode: slot.mode.to_string(),
            sensor_id: SensorReading::sensor_id(&self.config.building_id, &profile.id, profile.floor),
            voltage: 0.0,
            current: 0.0,
            power_factor: 0.0,
            temperature_c: ambient.temperature_c,
            humidity_pct: ambient.humidity_pct,
            quality: Quality::Ok,
            device_count: profile.devices,
            floor: profile.floor,
            sequence: slot.cursor.sequence,
            relay_state: slot.relay.state,
            tags: Vec::new(),
        };

        if !slot.relay.state.is_on() {
            reading.mode = TAG_RELAY_OFF.to_string();
            reading.quality = Quality::RelayOff;
            reading.device_count = 0;
            reading.temperature_c = 0.0;
            reading.humidity_pct = 0.0;
            reading.tags.push(TAG_RELAY_OFF.to_string());
            return Some(reading);
        }

        match slot.mode {
            SimMode::SensorFailure => {
                warn!(area = %profile.id, sequence = reading.sequence, "[SENSOR_FAILURE] dropping reading");
                return None;
            }
            SimMode::Intermittent => {
                let skip = slot.cursor.skip_next;
                slot.cursor.skip_next = !skip;
                if skip {
                    warn!(area = %profile.id, sequence = reading.sequence, "[INTERMITTENT] skipping reading");
                    return None;
                }
                reading.tags.push(TAG_INTERMITTENT.to_string());
            }
            _ => {}
        }

        let base = self
            .env
            .baseline_kwh(profile, fractional_hour, local.month(), is_night);

        let (kwh, quality) = match slot.mode {
            SimMode::GradualDrift => {
                let drift = (slot.cursor.drift + DRIFT_STEP).min(DRIFT_CAP);
                slot.cursor.drift = drift;
                reading.tags.push(format!("drift_factor:{:.2}", drift));
                let quality = if drift > DRIFT_DEGRADED_ABOVE {
                    Quality::Degraded
                } else {
                    Quality::Ok
                };
                (apply_noise(base * drift, profile.variability, &mut *rng), quality)
            }
            SimMode::Anomaly => {
                reading.tags.push(TAG_SPIKE.to_string());
                (
                    apply_noise(base * ANOMALY_FACTOR, SPIKE_NOISE_STD, &mut *rng),
                    Quality::Degraded,
                )
            }
            SimMode::NightAnomaly if is_night => {
                reading.tags.push(TAG_NIGHT_SPIKE.to_string());
                (
                    apply_noise(base * NIGHT_ANOMALY_FACTOR, SPIKE_NOISE_STD, &mut *rng),
                    Quality::Degraded,
                )
            }
            _ => (apply_noise(base, profile.variability, &mut *rng), Quality::Ok),
        };

        let kwh = round_to(kwh, 4);
        let Electrical {
            voltage_v,
            current_a,
            power_factor,
        } = self.env.electrical(kwh, &mut *rng);

        reading.kwh = kwh;
        reading.quality = quality;
        reading.voltage = voltage_v;
        reading.current = current_a;
        reading.power_factor = power_factor;
        Some(reading)
    }
}
