//! # Environment Model
//!
//! Stateless helpers that turn a wall-clock time and a power draw into the
//! ambient and electrical side values of a reading. Randomness is always
//! drawn from the caller's RNG so seeded generators stay reproducible.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::domain::{round_to, AreaProfile};

/// Night window in local hours, wrapping across midnight when `start > end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl NightWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour: start_hour % 24,
            end_hour: end_hour % 24,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        let hour = hour % 24;
        if self.start_hour == self.end_hour {
            false
        } else if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            hour >= self.start_hour && hour < self.end_hour
        }
    }
}

impl Default for NightWindow {
    fn default() -> Self {
        Self::new(22, 6)
    }
}

/// Ambient conditions at the sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ambient {
    pub temperature_c: f64,
    pub humidity_pct: f64,
}

/// Electrical side values derived from a load
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Electrical {
    pub voltage_v: f64,
    pub current_a: f64,
    pub power_factor: f64,
}

impl Electrical {
    pub fn de_energized() -> Self {
        Self {
            voltage_v: 0.0,
            current_a: 0.0,
            power_factor: 0.0,
        }
    }
}

/// Environment model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Nominal line voltage in V
    pub nominal_voltage_v: f64,
    /// Voltage standard deviation in V
    pub voltage_std_dev_v: f64,
    pub power_factor_min: f64,
    pub power_factor_max: f64,
    /// Width (std dev, hours) of the load bell curve around the peak hour
    pub peak_width_hours: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            nominal_voltage_v: 220.0,
            voltage_std_dev_v: 2.0,
            power_factor_min: 0.85,
            power_factor_max: 0.98,
            peak_width_hours: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentModel {
    config: EnvironmentConfig,
}

impl EnvironmentModel {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Daily temperature/humidity cycle: ~18 °C / 75 % at night, ~28 °C / 40 % at noon
    pub fn ambient<R: Rng + ?Sized>(&self, hour: u32, rng: &mut R) -> Ambient {
        let phase = (PI * (hour as f64 - 6.0) / 12.0).sin();
        let temperature = 18.0 + 10.0 * phase + gaussian(rng, 0.0, 0.5);
        let humidity = 75.0 - 35.0 * phase + gaussian(rng, 0.0, 1.5);

        Ambient {
            temperature_c: round_to(temperature.clamp(15.0, 35.0), 1),
            humidity_pct: round_to(humidity.clamp(20.0, 95.0), 1),
        }
    }

    /// Voltage ~ N(220, 2), PF ~ U(0.85, 0.98), I = P / (V * PF).
    ///
    /// The kWh value is used as a proxy for instantaneous kW.
    pub fn electrical<R: Rng + ?Sized>(&self, kwh: f64, rng: &mut R) -> Electrical {
        let cfg = &self.config;
        let voltage = round_to(
            gaussian(rng, cfg.nominal_voltage_v, cfg.voltage_std_dev_v),
            1,
        );
        let power_factor = round_to(rng.gen_range(cfg.power_factor_min..=cfg.power_factor_max), 3);
        let denominator = voltage * power_factor;
        let current = if denominator > 0.0 {
            round_to(kwh * 1000.0 / denominator, 2)
        } else {
            0.0
        };

        Electrical {
            voltage_v: voltage,
            current_a: current,
            power_factor,
        }
    }

    /// Bell curve multiplier centred on the profile's peak hour.
    ///
    /// Distance wraps around midnight, so a 23:00 peak still lifts 01:00.
    pub fn hourly_factor(&self, profile: &AreaProfile, fractional_hour: f64) -> f64 {
        let mut distance = (fractional_hour - profile.peak_hour as f64).abs();
        if distance > 12.0 {
            distance = 24.0 - distance;
        }
        let width = self.config.peak_width_hours.max(f64::EPSILON);
        let bell = (-0.5 * (distance / width).powi(2)).exp();
        1.0 + (profile.peak_factor - 1.0) * bell
    }

    /// Baseline load before any fault overlay or noise
    pub fn baseline_kwh(
        &self,
        profile: &AreaProfile,
        fractional_hour: f64,
        month: u32,
        is_night: bool,
    ) -> f64 {
        let base = if is_night {
            profile.night_kwh
        } else {
            profile.base_kwh
        };
        base * self.hourly_factor(profile, fractional_hour) * seasonal_factor(month)
    }
}

/// Southern-hemisphere seasonal adjustment: summer (Dec-Mar) up to +5 %, winter down to -4 %
pub fn seasonal_factor(month: u32) -> f64 {
    match month {
        12 | 1 => 1.05,
        2 => 1.04,
        3 | 11 => 1.02,
        4 | 10 => 1.00,
        5 => 0.99,
        6 | 8 => 0.97,
        7 => 0.96,
        9 => 0.98,
        _ => 1.0,
    }
}

/// Multiplicative Gaussian noise around 1.0, floored so the load stays positive
pub fn apply_noise<R: Rng + ?Sized>(kwh: f64, std_pct: f64, rng: &mut R) -> f64 {
    (kwh * gaussian(rng, 1.0, std_pct)).max(0.01)
}

fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    if !(std_dev.is_finite() && std_dev > 0.0) {
        return mean;
    }
    match Normal::new(mean, std_dev) {
        Ok(normal) => normal.sample(rng),
        Err(_) => mean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn auditorio() -> AreaProfile {
        AreaProfile::new("auditorio", 5.5, 0.2, 0.25, 16, 1.60, 6, 1)
    }

    #[test]
    fn test_night_window_wraps_midnight() {
        let window = NightWindow::default();
        assert!(window.contains(22));
        assert!(window.contains(23));
        assert!(window.contains(0));
        assert!(window.contains(5));
        assert!(!window.contains(6));
        assert!(!window.contains(12));
        assert!(!window.contains(21));
    }

    #[test]
    fn test_night_window_same_day() {
        let window = NightWindow::new(1, 4);
        assert!(window.contains(1));
        assert!(window.contains(3));
        assert!(!window.contains(4));
        assert!(!window.contains(0));
        assert!(!NightWindow::new(5, 5).contains(5));
    }

    #[test]
    fn test_hourly_factor_peaks_at_peak_hour() {
        let model = EnvironmentModel::default();
        let profile = auditorio();

        let at_peak = model.hourly_factor(&profile, 16.0);
        assert!((at_peak - 1.60).abs() < 1e-9);

        let three_hours_off = model.hourly_factor(&profile, 13.0);
        assert!(three_hours_off < at_peak);
        assert!(three_hours_off > 1.0);

        // Symmetric around the peak
        let before = model.hourly_factor(&profile, 14.0);
        let after = model.hourly_factor(&profile, 18.0);
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn test_hourly_factor_wraps_across_midnight() {
        let model = EnvironmentModel::default();
        let late_peak = AreaProfile::new("x", 1.0, 1.0, 0.1, 23, 2.0, 1, 0);

        let one_am = model.hourly_factor(&late_peak, 1.0);
        let nine_pm = model.hourly_factor(&late_peak, 21.0);
        assert!((one_am - nine_pm).abs() < 1e-9);
    }

    #[test]
    fn test_seasonal_factor_table() {
        assert_eq!(seasonal_factor(1), 1.05);
        assert_eq!(seasonal_factor(7), 0.96);
        assert_eq!(seasonal_factor(10), 1.00);
        assert_eq!(seasonal_factor(13), 1.0);
    }

    #[test]
    fn test_baseline_uses_night_profile() {
        let model = EnvironmentModel::default();
        let profile = auditorio();

        let day = model.baseline_kwh(&profile, 16.0, 4, false);
        assert!((day - 5.5 * 1.60).abs() < 1e-9);

        let night = model.baseline_kwh(&profile, 16.0, 4, true);
        assert!((night - 0.2 * 1.60).abs() < 1e-9);
    }

    #[test]
    fn test_ambient_ranges() {
        let model = EnvironmentModel::default();
        let mut rng = StdRng::seed_from_u64(42);

        for hour in 0..24 {
            let ambient = model.ambient(hour, &mut rng);
            assert!((15.0..=35.0).contains(&ambient.temperature_c));
            assert!((20.0..=95.0).contains(&ambient.humidity_pct));
        }

        let noon = model.ambient(12, &mut rng);
        let midnight = model.ambient(0, &mut rng);
        assert!(noon.temperature_c > midnight.temperature_c);
        assert!(noon.humidity_pct < midnight.humidity_pct);
    }

    #[test]
    fn test_electrical_values() {
        let model = EnvironmentModel::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let e = model.electrical(5.0, &mut rng);
            assert!((200.0..240.0).contains(&e.voltage_v));
            assert!((0.85..=0.98).contains(&e.power_factor));
            let expected = 5.0 * 1000.0 / (e.voltage_v * e.power_factor);
            assert!((e.current_a - expected).abs() < 0.01);
        }
    }

    #[test]
    fn test_noise_never_goes_non_positive() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            assert!(apply_noise(0.05, 5.0, &mut rng) >= 0.01);
        }
        // Zero variability leaves the value untouched
        assert_eq!(apply_noise(3.0, 0.0, &mut rng), 3.0);
    }
}
