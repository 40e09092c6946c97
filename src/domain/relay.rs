use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Virtual breaker position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayState {
    #[default]
    On,
    Off,
}

impl RelayState {
    pub fn is_on(&self) -> bool {
        matches!(self, RelayState::On)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelayState::On => "ON",
            RelayState::Off => "OFF",
        }
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Authoritative breaker record for one area, with audit metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub state: RelayState,
    pub reason: String,
    pub changed_by: String,
    /// `None` until the first command touches this relay
    pub changed_at: Option<DateTime<Utc>>,
}

impl RelayRecord {
    /// Initial record: energized, never changed
    pub fn energized() -> Self {
        Self {
            state: RelayState::On,
            reason: String::new(),
            changed_by: "sistema".to_string(),
            changed_at: None,
        }
    }

    pub fn apply(&mut self, state: RelayState, reason: &str, actor: &str, at: DateTime<Utc>) {
        self.state = state;
        self.reason = reason.to_string();
        self.changed_by = actor.to_string();
        self.changed_at = Some(at);
    }
}

impl Default for RelayRecord {
    fn default() -> Self {
        Self::energized()
    }
}
