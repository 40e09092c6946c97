use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::state::AreaSlots;
use crate::domain::{RelayRecord, RelayState, RelayStatusEntry, RelayStatusReport};
use crate::error::SimError;

/// Virtual breakers, one per registered area.
///
/// Records live inside [`AreaSlots`] next to each area's generator cursor.
/// Command application is additionally serialized through `gate` so a
/// system-wide switch never interleaves with another command.
pub struct RelayManager {
    slots: Arc<AreaSlots>,
    gate: Mutex<()>,
}

impl RelayManager {
    pub fn new(slots: Arc<AreaSlots>) -> Self {
        Self {
            slots,
            gate: Mutex::new(()),
        }
    }

    pub fn get(&self, area: &str) -> Result<RelayState, SimError> {
        self.slots.with_slot(area, |slot| slot.relay.state)
    }

    pub fn record(&self, area: &str) -> Result<RelayRecord, SimError> {
        self.slots.with_slot(area, |slot| slot.relay.clone())
    }

    /// Switch one relay. Re-applying the current state refreshes the audit fields.
    pub fn set(
        &self,
        area: &str,
        state: RelayState,
        reason: &str,
        actor: &str,
    ) -> Result<RelayRecord, SimError> {
        let _gate = self.gate.lock();
        self.apply(area, state, reason, actor)
    }

    /// Switch every registered relay as one logical operation
    pub fn set_all(
        &self,
        state: RelayState,
        reason: &str,
        actor: &str,
    ) -> Result<Vec<RelayRecord>, SimError> {
        let _gate = self.gate.lock();
        self.slots
            .areas()
            .iter()
            .map(|area| self.apply(area, state, reason, actor))
            .collect()
    }

    fn apply(
        &self,
        area: &str,
        state: RelayState,
        reason: &str,
        actor: &str,
    ) -> Result<RelayRecord, SimError> {
        let now = Utc::now();
        let (previous, record) = self.slots.with_slot(area, |slot| {
            let previous = slot.relay.state;
            slot.relay.apply(state, reason, actor, now);
            (previous, slot.relay.clone())
        })?;

        info!(
            area = %area,
            from = %previous,
            to = %state,
            reason = %reason,
            origin = %actor,
            "[RELAY] state applied"
        );
        Ok(record)
    }

    pub fn snapshot(&self) -> RelayStatusReport {
        let _gate = self.gate.lock();
        let relay_states: BTreeMap<String, RelayStatusEntry> = self
            .slots
            .areas()
            .iter()
            .filter_map(|area| {
                self.slots
                    .with_slot(area, |slot| RelayStatusEntry::from(&slot.relay))
                    .ok()
                    .map(|entry| (area.clone(), entry))
            })
            .collect();

        RelayStatusReport {
            relay_states,
            ts: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AreaRegistry;

    fn manager() -> RelayManager {
        let slots = Arc::new(AreaSlots::new(&AreaRegistry::campus_default()));
        RelayManager::new(slots)
    }

    #[test]
    fn test_relays_start_on() {
        let relays = manager();
        assert_eq!(relays.get("biblioteca").unwrap(), RelayState::On);
        assert_eq!(relays.record("biblioteca").unwrap().changed_by, "sistema");
    }

    #[test]
    fn test_set_is_idempotent() {
        let relays = manager();
        let first = relays.set("cafeteria", RelayState::On, "check", "n8n").unwrap();
        let second = relays.set("cafeteria", RelayState::On, "check again", "bot").unwrap();

        assert_eq!(first.state, RelayState::On);
        assert_eq!(second.state, RelayState::On);
        assert_eq!(second.reason, "check again");
        assert_eq!(second.changed_by, "bot");
        assert!(second.changed_at >= first.changed_at);
    }

    #[test]
    fn test_set_all_switches_every_area() {
        let relays = manager();
        let records = relays.set_all(RelayState::Off, "drill", "ops").unwrap();
        assert_eq!(records.len(), 10);

        let report = relays.snapshot();
        assert_eq!(report.relay_states.len(), 10);
        assert!(report
            .relay_states
            .values()
            .all(|entry| entry.state == RelayState::Off && entry.reason == "drill"));
    }

    #[test]
    fn test_unknown_area_leaves_every_record_untouched() {
        let relays = manager();
        let before = relays.snapshot().relay_states;

        let err = relays.set("sotano", RelayState::Off, "x", "y").unwrap_err();
        assert!(matches!(err, SimError::UnknownArea(_)));
        assert_eq!(relays.snapshot().relay_states, before);
    }

    #[test]
    fn test_snapshot_formats_last_change() {
        let relays = manager();
        relays.set("gimnasio", RelayState::Off, "maintenance", "telegram").unwrap();

        let report = relays.snapshot();
        let entry = &report.relay_states["gimnasio"];
        assert_eq!(entry.state, RelayState::Off);
        assert!(!entry.changed_at.is_empty());
        assert_eq!(entry.changed_by, "telegram");
        assert!(report.relay_states["biblioteca"].changed_at.is_empty());
    }
}
