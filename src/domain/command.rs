//! Control-channel payloads: inbound command frames and outbound
//! acknowledgements / status documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::relay::{RelayRecord, RelayState};
use crate::error::SimError;

pub const DEFAULT_REASON: &str = "comando_externo";
pub const DEFAULT_ORIGIN: &str = "desconocido";
pub const SYSTEM_LABEL: &str = "system";
pub const ALL_AREAS: &str = "all";

/// Raw inbound command as published by automation flows and bots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    #[serde(rename = "accion")]
    pub action: String,
    #[serde(rename = "motivo", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "origen", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(rename = "modo", default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(rename = "intervalo", default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
}

impl CommandFrame {
    /// Decode a JSON payload; the action keyword is mandatory
    pub fn decode(payload: &[u8]) -> Result<Self, SimError> {
        let frame: CommandFrame = serde_json::from_slice(payload)
            .map_err(|e| SimError::MalformedCommand(e.to_string()))?;
        if frame.action.trim().is_empty() {
            return Err(SimError::MalformedCommand("missing 'accion'".to_string()));
        }
        Ok(frame)
    }

    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_interval(mut self, seconds: f64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or(DEFAULT_REASON)
    }

    pub fn origin_or_default(&self) -> &str {
        self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN)
    }
}

/// Recognized command keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    CutPower,
    RestorePower,
    RelayStatus,
    SetMode,
    SetInterval,
}

impl CommandAction {
    /// Relay state a power action drives to, `None` for non-relay actions
    pub fn target_state(&self) -> Option<RelayState> {
        match self {
            CommandAction::CutPower => Some(RelayState::Off),
            CommandAction::RestorePower => Some(RelayState::On),
            _ => None,
        }
    }
}

impl std::str::FromStr for CommandAction {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cut_power" | "emergency_cut" | "turn_off" | "cortar_energia" | "corte_emergencia"
            | "apagar" => Ok(CommandAction::CutPower),
            "restore_power" | "turn_on" | "reset" | "restaurar_energia" | "encender"
            | "restablecer" => Ok(CommandAction::RestorePower),
            "relay_status" | "status_rele" => Ok(CommandAction::RelayStatus),
            "set_mode" => Ok(CommandAction::SetMode),
            "set_interval" => Ok(CommandAction::SetInterval),
            other => Err(SimError::UnknownAction(other.to_string())),
        }
    }
}

/// Which areas a command applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    Area(String),
    All,
}

impl CommandTarget {
    /// Resolve from the topic area (if any) and the frame's own `area` field.
    ///
    /// An area topic always wins. On the system topic the frame may name a
    /// single area; absent or `"all"` means system-wide.
    pub fn resolve(topic_area: Option<&str>, frame_area: Option<&str>) -> Self {
        match topic_area.or(frame_area).map(str::trim) {
            None | Some("") | Some(ALL_AREAS) | Some(SYSTEM_LABEL) => CommandTarget::All,
            Some(area) => CommandTarget::Area(area.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            CommandTarget::Area(area) => area,
            CommandTarget::All => SYSTEM_LABEL,
        }
    }
}

/// Relay change acknowledgement, one per applied power command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    pub area: String,
    pub relay_state: RelayState,
    #[serde(rename = "motivo")]
    pub reason: String,
    #[serde(rename = "origen")]
    pub origin: String,
    pub ts: DateTime<Utc>,
}

/// Acknowledgement for mode / interval changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAck {
    pub area: String,
    #[serde(rename = "modo", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(rename = "intervalo", skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
    #[serde(rename = "origen")]
    pub origin: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStatusEntry {
    #[serde(rename = "estado")]
    pub state: RelayState,
    /// Empty until the relay has been changed at least once
    #[serde(rename = "ultimo_cambio")]
    pub changed_at: String,
    #[serde(rename = "motivo")]
    pub reason: String,
    #[serde(rename = "origen")]
    pub changed_by: String,
}

impl From<&RelayRecord> for RelayStatusEntry {
    fn from(record: &RelayRecord) -> Self {
        Self {
            state: record.state,
            changed_at: record
                .changed_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            reason: record.reason.clone(),
            changed_by: record.changed_by.clone(),
        }
    }
}

/// Snapshot of every relay, published in answer to a status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStatusReport {
    pub relay_states: BTreeMap<String, RelayStatusEntry>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Online,
    Offline,
}

/// Retained system status document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: Availability,
    pub building: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub run_id: String,
    pub ts: DateTime<Utc>,
}
