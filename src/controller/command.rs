use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::relay::RelayManager;
use super::state::{AreaSlots, TickInterval};
use crate::domain::{
    AckFrame, CommandAction, CommandFrame, CommandTarget, ConfigAck, RelayStatusReport, SimMode,
    SYSTEM_LABEL,
};
use crate::error::SimError;

/// What a successfully handled command asks the caller to publish
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    RelayAck(AckFrame),
    RelayStatus(RelayStatusReport),
    Config(ConfigAck),
}

/// Validates inbound command frames and applies them to shared state.
///
/// A rejected frame never mutates anything.
pub struct CommandProcessor {
    slots: Arc<AreaSlots>,
    relays: Arc<RelayManager>,
    interval: Arc<TickInterval>,
}

impl CommandProcessor {
    pub fn new(slots: Arc<AreaSlots>, relays: Arc<RelayManager>, interval: Arc<TickInterval>) -> Self {
        Self {
            slots,
            relays,
            interval,
        }
    }

    /// Handle one frame. `topic_area` is the area segment of the topic it
    /// arrived on, `None` for the system topic.
    pub fn handle(
        &self,
        topic_area: Option<&str>,
        frame: &CommandFrame,
    ) -> Result<CommandOutcome, SimError> {
        let action: CommandAction = frame.action.parse()?;
        let target = CommandTarget::resolve(topic_area, frame.area.as_deref());

        if let CommandTarget::Area(area) = &target {
            if !self.slots.contains(area) {
                return Err(SimError::UnknownArea(area.clone()));
            }
        }

        let origin = frame.origin_or_default();

        match action {
            CommandAction::CutPower | CommandAction::RestorePower => {
                let state = match action.target_state() {
                    Some(state) => state,
                    None => return Err(SimError::UnknownAction(frame.action.clone())),
                };
                let reason = frame.reason_or_default();

                match &target {
                    CommandTarget::Area(area) => {
                        self.relays.set(area, state, reason, origin)?;
                    }
                    CommandTarget::All => {
                        self.relays.set_all(state, reason, origin)?;
                    }
                }

                Ok(CommandOutcome::RelayAck(AckFrame {
                    area: target.label().to_string(),
                    relay_state: state,
                    reason: reason.to_string(),
                    origin: origin.to_string(),
                    ts: Utc::now(),
                }))
            }
            CommandAction::RelayStatus => Ok(CommandOutcome::RelayStatus(self.relays.snapshot())),
            CommandAction::SetMode => {
                let requested = frame
                    .mode
                    .as_deref()
                    .ok_or_else(|| SimError::MalformedCommand("missing 'modo'".to_string()))?;
                let mode = SimMode::parse(requested)?;

                match &target {
                    CommandTarget::Area(area) => {
                        let previous = self.slots.set_mode(area, mode)?;
                        info!(area = %area, from = %previous, to = %mode, origin = %origin, "[MODE] changed");
                    }
                    CommandTarget::All => {
                        for area in self.slots.areas() {
                            self.slots.set_mode(area, mode)?;
                        }
                        info!(to = %mode, origin = %origin, "[MODE] changed for all areas");
                    }
                }

                Ok(CommandOutcome::Config(ConfigAck {
                    area: target.label().to_string(),
                    mode: Some(mode.to_string()),
                    interval_seconds: None,
                    origin: origin.to_string(),
                    ts: Utc::now(),
                }))
            }
            CommandAction::SetInterval => {
                let requested = frame
                    .interval_seconds
                    .filter(|s| s.is_finite())
                    .ok_or_else(|| SimError::MalformedCommand("missing 'intervalo'".to_string()))?;
                let applied = self.interval.set(requested);
                info!(requested, applied, origin = %origin, "[INTERVAL] changed");

                Ok(CommandOutcome::Config(ConfigAck {
                    area: SYSTEM_LABEL.to_string(),
                    mode: None,
                    interval_seconds: Some(applied),
                    origin: origin.to_string(),
                    ts: Utc::now(),
                }))
            }
        }
    }
}
