use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use validator::{Validate, ValidationError};

use crate::controller::state::TickInterval;
use crate::domain::{AreaProfile, AreaRegistry, SimMode};
use crate::error::SimError;
use crate::simulation::{EnvironmentConfig, GeneratorConfig, NightWindow};
use crate::transport::{Qos, TransportMode};

pub const CONFIG_FILE: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "SIM__";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub transport: TransportConfig,
    #[validate(nested)]
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
    /// Replaces the built-in campus catalog when non-empty
    #[validate(nested)]
    pub areas: Vec<AreaProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_reconnect_window"))]
pub struct TransportConfig {
    pub mode: TransportMode,
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Defaults to `sensor_sim_{building_id}`
    pub client_id: Option<String>,
    #[validate(range(max = 2))]
    pub qos: u8,
    pub keep_alive_seconds: u64,
    /// Upper bound for a single publish before it is abandoned; a tick
    /// further caps it at the current interval
    #[validate(range(min = 1, max = 60_000))]
    pub publish_timeout_ms: u64,
    pub reconnect_min_seconds: u64,
    pub reconnect_max_seconds: u64,
    #[validate(range(min = 1))]
    pub connect_retry_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Loopback,
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            qos: 0,
            keep_alive_seconds: 60,
            publish_timeout_ms: 2_000,
            reconnect_min_seconds: 1,
            reconnect_max_seconds: 60,
            connect_retry_seconds: 10,
        }
    }
}

fn validate_reconnect_window(cfg: &TransportConfig) -> Result<(), ValidationError> {
    if cfg.reconnect_min_seconds > cfg.reconnect_max_seconds {
        let mut err = ValidationError::new("reconnect_window");
        err.message = Some("reconnect_min_seconds exceeds reconnect_max_seconds".into());
        return Err(err);
    }
    Ok(())
}

impl TransportConfig {
    pub fn broker_url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }

    pub fn qos(&self) -> Qos {
        Qos::try_from(self.qos).unwrap_or_default()
    }

    pub fn client_id(&self, building_id: &str) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("sensor_sim_{}", building_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    #[validate(length(min = 1))]
    pub building_id: String,
    #[validate(length(min = 1))]
    pub topic_prefix: String,
    /// Seconds between ticks, clamped to [1, 60]
    pub interval_seconds: f64,
    #[validate(range(max = 23))]
    pub night_start_hour: u32,
    #[validate(range(max = 23))]
    pub night_end_hour: u32,
    /// IANA zone name
    pub timezone: String,
    pub random_seed: Option<u64>,
    /// Mode applied to `anomaly_area` at startup; every other area starts normal
    pub initial_mode: Option<String>,
    pub anomaly_area: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            building_id: "edificio_principal".to_string(),
            topic_prefix: "edificio".to_string(),
            interval_seconds: 30.0,
            night_start_hour: 22,
            night_end_hour: 6,
            timezone: "America/Lima".to_string(),
            random_seed: None,
            initial_mode: None,
            anomaly_area: None,
        }
    }
}

impl SimulationConfig {
    pub fn timezone(&self) -> Result<Tz, SimError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| SimError::Config(format!("timezone '{}': {}", self.timezone, e)))
    }

    pub fn night_window(&self) -> NightWindow {
        NightWindow::new(self.night_start_hour, self.night_end_hour)
    }

    pub fn generator_config(&self) -> Result<GeneratorConfig, SimError> {
        Ok(GeneratorConfig {
            building_id: self.building_id.clone(),
            night_window: self.night_window(),
            timezone: self.timezone()?,
            random_seed: self.random_seed,
            environment: EnvironmentConfig::default(),
        })
    }

    /// Startup mode assignments, `(area, mode)`.
    ///
    /// Without an `anomaly_area` the mode applies to every area.
    pub fn initial_modes(&self, registry: &AreaRegistry) -> Result<Vec<(String, SimMode)>, SimError> {
        let Some(name) = self.initial_mode.as_deref() else {
            return Ok(Vec::new());
        };
        let mode = SimMode::parse(name)?;

        match self.anomaly_area.as_deref().map(str::trim) {
            Some(area) if !area.is_empty() => {
                if !registry.contains(area) {
                    return Err(SimError::UnknownArea(area.to_string()));
                }
                Ok(vec![(area.to_string(), mode)])
            }
            _ => Ok(registry.ids().map(|id| (id.to_string(), mode)).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Optional daily-rolling log file
    pub file: Option<PathBuf>,
    /// Fallback filter when `RUST_LOG` is unset
    pub filter: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let figment = Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let mut cfg: Config = figment.extract()?;

        cfg.apply_legacy_env(|key| std::env::var(key).ok())?;
        cfg.finalize()?;
        Ok(cfg)
    }

    /// Flat variables used by existing deployments; they win over the file
    pub fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MQTT_BROKER") {
            self.transport.host = host;
            if lookup("SIM__TRANSPORT__MODE").is_none() {
                self.transport.mode = TransportMode::Mqtt;
            }
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.transport.port = port.trim().parse().context("MQTT_PORT")?;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.transport.username = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.transport.password = Some(pass);
        }
        if let Some(qos) = lookup("MQTT_QOS") {
            self.transport.qos = qos.trim().parse().context("MQTT_QOS")?;
        }
        if let Some(prefix) = lookup("TOPIC_PREFIX") {
            self.simulation.topic_prefix = prefix;
        }
        if let Some(building) = lookup("BUILDING_ID") {
            self.simulation.building_id = building;
        }
        if let Some(interval) = lookup("SIM_INTERVAL") {
            self.simulation.interval_seconds = interval.trim().parse().context("SIM_INTERVAL")?;
        }
        if let Some(mode) = lookup("SIM_MODE") {
            self.simulation.initial_mode = Some(mode);
        }
        if let Some(area) = lookup("ANOMALY_AREA") {
            self.simulation.anomaly_area = Some(area);
        }
        Ok(())
    }

    /// Clamp, validate and resolve derived values
    pub fn finalize(&mut self) -> Result<()> {
        let clamped = TickInterval::clamp(self.simulation.interval_seconds);
        if clamped != self.simulation.interval_seconds {
            warn!(
                requested = self.simulation.interval_seconds,
                applied = clamped,
                "interval out of range, clamped"
            );
            self.simulation.interval_seconds = clamped;
        }

        self.validate().context("invalid configuration")?;
        self.simulation.timezone()?;
        self.registry()?;
        Ok(())
    }

    /// Area catalog in effect
    pub fn registry(&self) -> Result<AreaRegistry, SimError> {
        if self.areas.is_empty() {
            return Ok(AreaRegistry::campus_default());
        }
        let registry = AreaRegistry::new(self.areas.clone());
        if registry.is_empty() {
            return Err(SimError::Config("no areas configured".to_string()));
        }
        Ok(registry)
    }
}
