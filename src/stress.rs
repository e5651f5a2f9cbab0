//! Stress-test price perturbations.
//!
//! Implements the pluggable shock model consumed by the price provider:
//! jump diffusion (a menu of discrete crash/spike sizes) plus an
//! extreme-value tail drawn from a Pareto distribution. Both stages are
//! driven by the provider's per-day seeded RNG, so stressed series stay
//! fully reproducible.

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Pareto;

/// Direction filter for jump events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpDirection {
    Down,
    Up,
    Both,
}

/// Configuration for the jump/extreme-value shock model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub enabled: bool,
    /// Per-day probability of a jump event
    pub jump_probability: f64,
    /// Possible jump sizes as fractions (-0.20 = -20%)
    pub jump_sizes: Vec<f64>,
    pub jump_direction: JumpDirection,
    /// Per-day probability of an extreme tail event
    pub extreme_probability: f64,
    /// Center of the extreme move, as a fraction (negative = crash)
    pub extreme_threshold: f64,
    /// Pareto tail index; smaller means heavier tails
    pub extreme_tail_index: f64,
    /// Scale applied to the Pareto excess
    pub extreme_scale: f64,
}

impl Default for StressConfig {
    fn default() -> Self {
        StressConfig {
            enabled: false,
            jump_probability: 0.02,
            jump_sizes: vec![-0.20, -0.15, -0.10],
            jump_direction: JumpDirection::Down,
            extreme_probability: 0.01,
            extreme_threshold: -0.15,
            extreme_tail_index: 3.0,
            extreme_scale: 0.10,
        }
    }
}

/// A price-change perturbation applied on top of the base daily change.
///
/// Returns the adjusted change percentage and whether a shock occurred.
pub trait Perturbation: Send + Sync {
    fn perturb(&self, base_change_pct: f64, rng: &mut StdRng) -> (f64, bool);
}

/// Jump diffusion with an extreme-value tail stage.
#[derive(Debug, Clone)]
pub struct JumpModel {
    config: StressConfig,
}

impl JumpModel {
    pub fn new(config: StressConfig) -> Self {
        JumpModel { config }
    }

    fn apply_direction(&self, size: f64) -> f64 {
        match self.config.jump_direction {
            JumpDirection::Down => -size.abs(),
            JumpDirection::Up => size.abs(),
            JumpDirection::Both => size,
        }
    }

    /// Draw an extreme crash magnitude, at least -5%.
    fn draw_extreme(&self, rng: &mut StdRng) -> f64 {
        let excess = match Pareto::new(1.0, self.config.extreme_tail_index) {
            Ok(pareto) => pareto.sample(rng) - 1.0,
            Err(_) => rng.gen_range(0.0..1.0),
        };
        let extreme = self.config.extreme_threshold - self.config.extreme_scale * excess;
        extreme.min(-0.05)
    }
}

impl Perturbation for JumpModel {
    fn perturb(&self, base_change_pct: f64, rng: &mut StdRng) -> (f64, bool) {
        if !self.config.enabled {
            return (base_change_pct, false);
        }

        if rng.gen::<f64>() < self.config.jump_probability {
            let size = self
                .config
                .jump_sizes
                .choose(rng)
                .copied()
                .unwrap_or(-0.10);
            let size = self.apply_direction(size);
            return (base_change_pct + size * 100.0, true);
        }

        if rng.gen::<f64>() < self.config.extreme_probability {
            // The extreme draw replaces the base change entirely.
            return (self.draw_extreme(rng) * 100.0, true);
        }

        (base_change_pct, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn enabled_config() -> StressConfig {
        StressConfig {
            enabled: true,
            jump_probability: 1.0,
            ..StressConfig::default()
        }
    }

    #[test]
    fn disabled_model_is_a_passthrough() {
        let model = JumpModel::new(StressConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(model.perturb(1.25, &mut rng), (1.25, false));
    }

    #[test]
    fn perturbation_is_deterministic_for_a_given_seed() {
        let model = JumpModel::new(enabled_config());
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        assert_eq!(model.perturb(0.5, &mut a), model.perturb(0.5, &mut b));
    }

    #[test]
    fn down_direction_always_subtracts() {
        let model = JumpModel::new(StressConfig {
            jump_sizes: vec![0.20, -0.10],
            ..enabled_config()
        });
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (adjusted, occurred) = model.perturb(0.0, &mut rng);
            assert!(occurred);
            assert!(adjusted < 0.0, "jump should be negative, got {adjusted}");
        }
    }

    #[test]
    fn extreme_stage_caps_at_minus_five_percent() {
        let model = JumpModel::new(StressConfig {
            jump_probability: 0.0,
            extreme_probability: 1.0,
            ..enabled_config()
        });
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (adjusted, occurred) = model.perturb(2.0, &mut rng);
            assert!(occurred);
            assert!(adjusted <= -5.0, "extreme must be at most -5%, got {adjusted}");
        }
    }
}
