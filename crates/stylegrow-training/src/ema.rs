//! Exponential moving average of generator weights.

use crate::error::TrainingResult;
use crate::params::ParameterSet;

/// Per-step retention factor for an EMA with a half-life of `g_ema_kimg` thousand images.
///
/// Returns 0 when the half-life is not positive, which makes every update a
/// plain copy (or a no-op while the warm-up gate is closed).
#[must_use]
pub fn ema_beta(minibatch_size: usize, g_ema_kimg: f64) -> f64 {
    if g_ema_kimg > 0.0 {
        0.5f64.powf(minibatch_size as f64 / (g_ema_kimg * 1000.0))
    } else {
        0.0
    }
}

/// Warm-up gate: 1 once `cur_nimg >= ema_start_kimg * 1000`, else 0.
#[must_use]
pub fn ema_multiplier(cur_nimg: u64, ema_start_kimg: f64) -> f64 {
    if cur_nimg as f64 >= ema_start_kimg * 1000.0 {
        1.0
    } else {
        0.0
    }
}

/// Move `gs` toward `g`: `gs = lerp(gs, g, (1 - beta) * multiplier)`.
///
/// `beta` is the fraction of the old average retained per step. With the gate
/// closed (`multiplier == 0`) `gs` is left exactly as it was.
pub fn update_moving_average(gs: &mut ParameterSet, g: &ParameterSet, beta: f64, multiplier: f64) -> TrainingResult<()> {
    let t = ((1.0 - beta) * multiplier) as f32;
    if t == 0.0 {
        return Ok(());
    }
    gs.lerp_toward(g, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn single(v: &[f32]) -> ParameterSet {
        std::iter::once(("w".to_string(), arr1(v).into_dyn())).collect()
    }

    #[test]
    fn test_beta_half_life() {
        // One half-life worth of images halves the retained weight.
        let per_step = ema_beta(1000, 10.0);
        assert!((per_step.powi(10) - 0.5).abs() < 1e-12);
        assert_eq!(ema_beta(32, 0.0), 0.0);
        assert_eq!(ema_beta(32, -1.0), 0.0);
    }

    #[test]
    fn test_multiplier_gate() {
        assert_eq!(ema_multiplier(0, 10.0), 0.0);
        assert_eq!(ema_multiplier(9_999, 10.0), 0.0);
        assert_eq!(ema_multiplier(10_000, 10.0), 1.0);
        assert_eq!(ema_multiplier(0, 0.0), 1.0);
    }

    #[test]
    fn test_update_matches_lerp() {
        let mut gs = single(&[1.0, -2.0]);
        let g = single(&[3.0, 2.0]);
        let beta = 0.75;
        update_moving_average(&mut gs, &g, beta, 1.0).unwrap();
        let w = gs.get("w").unwrap();
        assert!((w[0] - (1.0 + (3.0 - 1.0) * 0.25)).abs() < 1e-6);
        assert!((w[1] - (-2.0 + (2.0 + 2.0) * 0.25)).abs() < 1e-6);
    }

    #[test]
    fn test_closed_gate_leaves_average_unchanged() {
        let mut gs = single(&[1.0, -2.0]);
        let before = gs.clone();
        update_moving_average(&mut gs, &single(&[100.0, 100.0]), 0.9, 0.0).unwrap();
        assert_eq!(gs, before);
    }

    #[test]
    fn test_zero_beta_copies_generator() {
        let mut gs = single(&[1.0]);
        update_moving_average(&mut gs, &single(&[5.0]), 0.0, 1.0).unwrap();
        assert_eq!(gs.get("w").unwrap()[0], 5.0);
    }
}
