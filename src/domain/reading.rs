use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::relay::RelayState;

/// Data quality label attached to every reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Ok,
    Degraded,
    RelayOff,
}

/// One telemetry sample for one area.
///
/// Built once per tick and handed to the transport for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub area: String,
    pub kwh: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "modo")]
    pub mode: String,
    pub sensor_id: String,
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub quality: Quality,
    pub device_count: u32,
    pub floor: u32,
    /// Per-area monotonic counter for gap detection and de-duplication
    pub sequence: u64,
    pub relay_state: RelayState,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SensorReading {
    pub fn sensor_id(building_id: &str, area: &str, floor: u32) -> String {
        format!("{}_{}_s{:02}", building_id, area, floor)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Per-tick aggregate over all areas that reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub building_id: String,
    pub total_kwh: f64,
    pub areas_reporting: usize,
    pub areas_total: usize,
    pub mode: String,
    pub timestamp: DateTime<Utc>,
}

/// Round to a fixed number of decimals for publication
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
