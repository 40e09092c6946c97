//! # Sensor Simulation Module
//!
//! Synthetic telemetry for the building's areas.
//!
//! ## Components
//!
//! - **Environment**: ambient temperature/humidity cycle, electrical side values,
//!   time-of-day bell curve and seasonal factor
//! - **Generator**: per-area reading generator with the fault-mode overlay and relay gate
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use energy_monitor_sim::controller::state::AreaSlots;
//! use energy_monitor_sim::domain::AreaRegistry;
//! use energy_monitor_sim::simulation::{GeneratorConfig, ReadingGenerator};
//!
//! let registry = AreaRegistry::campus_default();
//! let slots = Arc::new(AreaSlots::new(&registry));
//! let generator = ReadingGenerator::new(GeneratorConfig::default(), slots);
//!
//! let profile = registry.get("biblioteca").unwrap();
//! let reading = generator.next(profile).unwrap();
//! assert!(reading.is_some());
//! ```

pub mod environment;
pub mod generator;

pub use environment::{
    apply_noise, seasonal_factor, Ambient, Electrical, EnvironmentConfig, EnvironmentModel,
    NightWindow,
};
pub use generator::{GeneratorConfig, GeneratorCursor, ReadingGenerator};
