//! Reactor-wide scalars carried into and out of every tick batch.

use serde::{Deserialize, Serialize};

/// Default share of overflowing power that turns into reactor heat.
pub const DEFAULT_OVERFLOW_TO_HEAT: f64 = 0.5;

/// Reactor scalars. `current_*` change every tick; the rest are settings
/// owned by the upgrade layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorState {
    pub current_heat: f64,
    pub current_power: f64,
    /// 0 disables the upper clamp.
    pub max_heat: f64,
    pub max_power: f64,
    /// Power produced per unit of vented heat.
    pub stirling_multiplier: f64,
    pub power_overflow_to_heat_ratio: f64,
    pub power_multiplier: f64,
    pub auto_sell_multiplier: f64,
    pub sell_price_multiplier: f64,
    pub heat_controlled: bool,
    /// Effective vent bonus in percent, used by heat control.
    pub vent_multiplier_eff: f64,
}

impl Default for ReactorState {
    fn default() -> Self {
        Self {
            current_heat: 0.0,
            current_power: 0.0,
            max_heat: 1000.0,
            max_power: 100.0,
            stirling_multiplier: 0.0,
            power_overflow_to_heat_ratio: DEFAULT_OVERFLOW_TO_HEAT,
            power_multiplier: 1.0,
            auto_sell_multiplier: 0.0,
            sell_price_multiplier: 1.0,
            heat_controlled: false,
            vent_multiplier_eff: 0.0,
        }
    }
}

/// A setting of 0 (or NaN) falls back to `default`.
fn positive_or(v: f64, default: f64) -> f64 {
    if v > 0.0 { v } else { default }
}

impl ReactorState {
    pub fn overflow_to_heat(&self) -> f64 {
        positive_or(self.power_overflow_to_heat_ratio, DEFAULT_OVERFLOW_TO_HEAT)
    }

    pub fn effective_power_multiplier(&self) -> f64 {
        positive_or(self.power_multiplier, 1.0)
    }

    pub fn sell_price(&self) -> f64 {
        positive_or(self.sell_price_multiplier, 1.0)
    }

    /// Reactor heat removed per tick by heat control, before the multiplier.
    pub fn heat_control_rate(&self) -> f64 {
        if !self.heat_controlled || self.max_power <= 0.0 {
            return 0.0;
        }
        self.max_power / 10_000.0 * (1.0 + self.vent_multiplier_eff / 100.0)
    }

    /// Clamp power to `max_power`; the overflow becomes heat.
    pub(crate) fn spill_power(&mut self) {
        if self.current_power > self.max_power {
            let overflow = self.current_power - self.max_power;
            self.current_heat += overflow * self.overflow_to_heat();
            self.current_power = self.max_power;
        }
    }

    /// Clamp reactor heat into `[0, max_heat]` (no upper bound when `max_heat` is 0).
    pub(crate) fn clamp_heat(&mut self) {
        if self.max_heat > 0.0 && self.current_heat > self.max_heat {
            self.current_heat = self.max_heat;
        }
        if self.current_heat.is_nan() || self.current_heat < 0.0 {
            self.current_heat = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_settings_fall_back() {
        let reactor = ReactorState {
            power_overflow_to_heat_ratio: 0.0,
            power_multiplier: 0.0,
            sell_price_multiplier: f64::NAN,
            ..ReactorState::default()
        };
        assert_eq!(reactor.overflow_to_heat(), 0.5);
        assert_eq!(reactor.effective_power_multiplier(), 1.0);
        assert_eq!(reactor.sell_price(), 1.0);
    }

    #[test]
    fn spill_converts_overflow() {
        let mut reactor = ReactorState {
            current_power: 130.0,
            max_power: 100.0,
            ..ReactorState::default()
        };
        reactor.spill_power();
        assert_eq!(reactor.current_power, 100.0);
        assert_eq!(reactor.current_heat, 15.0);
    }

    #[test]
    fn heat_control_needs_flag_and_power() {
        let mut reactor = ReactorState {
            max_power: 20_000.0,
            vent_multiplier_eff: 50.0,
            ..ReactorState::default()
        };
        assert_eq!(reactor.heat_control_rate(), 0.0);
        reactor.heat_controlled = true;
        assert_eq!(reactor.heat_control_rate(), 3.0);
    }

    #[test]
    fn clamp_respects_zero_max() {
        let mut reactor = ReactorState {
            current_heat: 5000.0,
            max_heat: 0.0,
            ..ReactorState::default()
        };
        reactor.clamp_heat();
        assert_eq!(reactor.current_heat, 5000.0);
        reactor.max_heat = 1000.0;
        reactor.clamp_heat();
        assert_eq!(reactor.current_heat, 1000.0);
        reactor.current_heat = -1.0;
        reactor.clamp_heat();
        assert_eq!(reactor.current_heat, 0.0);
    }
}
