use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::SimError;

/// Behaviour overlay applied to an area's baseline load.
///
/// Modes are assigned per area from the outside (startup config or a
/// `set_mode` command). The generator never switches modes on its own.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SimMode {
    /// Baseline load with noise
    #[default]
    Normal,
    /// Load x2.8 with tight noise
    Anomaly,
    /// No readings at all
    SensorFailure,
    /// Load ramps up by an accumulating factor
    GradualDrift,
    /// Readings alternate between present and missing
    Intermittent,
    /// Scheduler bursts 10 readings per tick for this area
    Flood,
    /// Load x3.5 only inside the night window
    NightAnomaly,
}

impl SimMode {
    /// Parse an externally supplied mode name
    pub fn parse(name: &str) -> Result<Self, SimError> {
        name.trim()
            .parse::<SimMode>()
            .map_err(|_| SimError::InvalidMode(name.to_string()))
    }

    /// Every mode label, in declaration order
    pub fn labels() -> Vec<&'static str> {
        SimMode::iter().map(|m| m.into()).collect()
    }

    /// Whether this mode changes how many readings the scheduler emits
    pub fn is_flood(&self) -> bool {
        matches!(self, SimMode::Flood)
    }
}
