//! Per-area mutable state shared by the publish loop and the command handler.
//!
//! Each area owns exactly one lock guarding its relay record, generator
//! cursor and active mode together, so a tick never observes a half-applied
//! command for that area.

use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::domain::{AreaRegistry, RelayRecord, SimMode};
use crate::error::SimError;
use crate::simulation::GeneratorCursor;

#[derive(Debug, Clone, Default)]
pub struct AreaSlot {
    pub relay: RelayRecord,
    pub cursor: GeneratorCursor,
    pub mode: SimMode,
}

#[derive(Debug)]
pub struct AreaSlots {
    order: Vec<String>,
    slots: HashMap<String, Mutex<AreaSlot>>,
}

impl AreaSlots {
    /// One fresh slot per registered area: relay ON, cursor zeroed, mode normal
    pub fn new(registry: &AreaRegistry) -> Self {
        let order: Vec<String> = registry.ids().map(str::to_string).collect();
        let slots = order
            .iter()
            .map(|id| (id.clone(), Mutex::new(AreaSlot::default())))
            .collect();
        Self { order, slots }
    }

    pub fn contains(&self, area: &str) -> bool {
        self.slots.contains_key(area)
    }

    /// Area ids in registry order
    pub fn areas(&self) -> &[String] {
        &self.order
    }

    /// Run `f` with exclusive access to one area's slot
    pub fn with_slot<R>(
        &self,
        area: &str,
        f: impl FnOnce(&mut AreaSlot) -> R,
    ) -> Result<R, SimError> {
        let slot = self
            .slots
            .get(area)
            .ok_or_else(|| SimError::UnknownArea(area.to_string()))?;
        let mut guard = slot.lock();
        Ok(f(&mut guard))
    }

    /// Copy of one area's slot
    pub fn snapshot(&self, area: &str) -> Result<AreaSlot, SimError> {
        self.with_slot(area, |slot| slot.clone())
    }

    pub fn mode(&self, area: &str) -> Result<SimMode, SimError> {
        self.with_slot(area, |slot| slot.mode)
    }

    /// Modes of every area, in registry order
    pub fn modes(&self) -> Vec<(String, SimMode)> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id).map(|s| (id.clone(), s.lock().mode)))
            .collect()
    }

    pub fn set_mode(&self, area: &str, mode: SimMode) -> Result<SimMode, SimError> {
        self.with_slot(area, |slot| std::mem::replace(&mut slot.mode, mode))
    }

    /// Mode shared by every area, or `mixed`
    pub fn mode_label(&self) -> String {
        match self.modes().into_iter().map(|(_, m)| m).all_equal_value() {
            Ok(mode) => mode.to_string(),
            Err(None) => SimMode::Normal.to_string(),
            Err(Some(_)) => MIXED_MODE_LABEL.to_string(),
        }
    }
}

pub const MIXED_MODE_LABEL: &str = "mixed";

pub const MIN_INTERVAL_SECONDS: f64 = 1.0;
pub const MAX_INTERVAL_SECONDS: f64 = 60.0;

/// Tick interval shared between the publish loop and the command handler
#[derive(Debug)]
pub struct TickInterval {
    millis: AtomicU64,
}

impl TickInterval {
    pub fn new(seconds: f64) -> Self {
        let interval = Self {
            millis: AtomicU64::new(0),
        };
        interval.set(seconds);
        interval
    }

    pub fn clamp(seconds: f64) -> f64 {
        if seconds.is_nan() {
            return MAX_INTERVAL_SECONDS;
        }
        seconds.clamp(MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS)
    }

    /// Store a new interval, returning the clamped value in seconds
    pub fn set(&self, seconds: f64) -> f64 {
        let clamped = Self::clamp(seconds);
        self.millis
            .store((clamped * 1000.0).round() as u64, Ordering::Relaxed);
        clamped
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Relaxed))
    }

    pub fn seconds(&self) -> f64 {
        self.get().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RelayState;

    #[test]
    fn test_slots_start_energized_and_normal() {
        let slots = AreaSlots::new(&AreaRegistry::campus_default());
        assert_eq!(slots.areas().len(), 10);

        let slot = slots.snapshot("biblioteca").unwrap();
        assert_eq!(slot.relay.state, RelayState::On);
        assert_eq!(slot.mode, SimMode::Normal);
        assert_eq!(slot.cursor.sequence, 0);
    }

    #[test]
    fn test_unknown_area_is_rejected() {
        let slots = AreaSlots::new(&AreaRegistry::campus_default());
        assert!(matches!(
            slots.with_slot("sotano", |_| ()),
            Err(SimError::UnknownArea(_))
        ));
        assert!(!slots.contains("sotano"));
    }

    #[test]
    fn test_set_mode_returns_previous() {
        let slots = AreaSlots::new(&AreaRegistry::campus_default());
        let previous = slots.set_mode("auditorio", SimMode::Anomaly).unwrap();
        assert_eq!(previous, SimMode::Normal);
        assert_eq!(slots.mode("auditorio").unwrap(), SimMode::Anomaly);

        let modes = slots.modes();
        assert_eq!(modes[0].0, "laboratorio_computo");
        assert_eq!(modes.iter().filter(|(_, m)| *m == SimMode::Anomaly).count(), 1);
        assert_eq!(slots.mode_label(), "mixed");
    }

    #[test]
    fn test_mode_label_when_uniform() {
        let slots = AreaSlots::new(&AreaRegistry::campus_default());
        assert_eq!(slots.mode_label(), "normal");
        for area in slots.areas().to_vec() {
            slots.set_mode(&area, SimMode::GradualDrift).unwrap();
        }
        assert_eq!(slots.mode_label(), "gradual_drift");
    }

    #[test]
    fn test_tick_interval_is_clamped() {
        let interval = TickInterval::new(30.0);
        assert_eq!(interval.get(), Duration::from_secs(30));

        assert_eq!(interval.set(0.2), 1.0);
        assert_eq!(interval.get(), Duration::from_secs(1));

        assert_eq!(interval.set(600.0), 60.0);
        assert_eq!(interval.seconds(), 60.0);

        assert_eq!(interval.set(2.5), 2.5);
        assert_eq!(interval.get(), Duration::from_millis(2500));
    }
}
