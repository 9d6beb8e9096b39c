//! Training objective helpers: p2 loss weighting and timestep sampling
//!
//! # References
//!
//! - [Perception Prioritized Training of Diffusion Models](https://arxiv.org/abs/2204.00227)

use burn::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::diffusion::batch_scalars;
use crate::scheduler::NoiseSchedule;

/// Lower bound of training progress values
const MIN_TRAINING_T: f64 = 0.001;
/// Stretch applied to uniform draws before clamping, oversampling t = 1
const TRAINING_T_STRETCH: f64 = 1.08;

/// Perception-prioritised weight `(k + ᾱ/(1 - ᾱ))^(-gamma)` at progress `t`
pub fn p2_weight(schedule: &NoiseSchedule, t: f64, k: f64, gamma: f64) -> f64 {
    let alpha = schedule.alpha_cumprod(t);
    (k + alpha / (1.0 - alpha)).powf(-gamma)
}

/// p2 weighting parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct P2Weighting {
    pub k: f64,
    pub gamma: f64,
}

impl Default for P2Weighting {
    fn default() -> Self {
        Self { k: 1.0, gamma: 1.0 }
    }
}

impl P2Weighting {
    pub fn weight(&self, schedule: &NoiseSchedule, t: f64) -> f64 {
        p2_weight(schedule, t, self.k, self.gamma)
    }

    pub fn weights(&self, schedule: &NoiseSchedule, t: &[f64]) -> Vec<f64> {
        t.iter().map(|&t| self.weight(schedule, t)).collect()
    }
}

/// Draws one training progress value per batch entry
///
/// `t = clamp((1 - u) * 1.08 + 0.001, 0.001, 1)` with `u ~ U[0, 1)`, so
/// roughly 7% of draws land exactly on t = 1.
pub fn sample_training_t<R: Rng + ?Sized>(batch: usize, rng: &mut R) -> Vec<f64> {
    (0..batch)
        .map(|_| {
            let u: f64 = rng.random();
            ((1.0 - u) * TRAINING_T_STRETCH + MIN_TRAINING_T).clamp(MIN_TRAINING_T, 1.0)
        })
        .collect()
}

/// Squared error weighted per sample by p2, averaged over masked-in elements
///
/// `atom_mask` has the shape of `pred` with 1 for known coordinates. Without a
/// mask every element counts.
pub fn p2_weighted_mse<B: Backend>(
    pred: Tensor<B, 3>,
    target: Tensor<B, 3>,
    t: &[f64],
    schedule: &NoiseSchedule,
    weighting: &P2Weighting,
    atom_mask: Option<Tensor<B, 3>>,
) -> Tensor<B, 1> {
    let [batch, _, _] = pred.dims();
    assert_eq!(t.len(), batch, "one progress value per batch entry");

    let weights = batch_scalars(&weighting.weights(schedule, t), &pred.device());
    let error = (pred - target).powi_scalar(2) * weights;
    masked_mean(error, atom_mask)
}

/// Mean absolute error over masked-in elements
pub fn masked_l1<B: Backend>(pred: Tensor<B, 3>, target: Tensor<B, 3>, atom_mask: Option<Tensor<B, 3>>) -> Tensor<B, 1> {
    masked_mean((pred - target).abs(), atom_mask)
}

fn masked_mean<B: Backend>(values: Tensor<B, 3>, mask: Option<Tensor<B, 3>>) -> Tensor<B, 1> {
    match mask {
        Some(mask) => (values * mask.clone()).sum() / mask.sum().clamp_min(1.0),
        None => values.mean(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    #[test]
    fn test_p2_weight_values() {
        let schedule = NoiseSchedule::default();
        // ᾱ = 1e-4 at t = 1: weight ≈ 1 / (1 + 1e-4 / 0.9999)
        let w = p2_weight(&schedule, 1.0, 1.0, 1.0);
        assert!((w - 1.0 / (1.0 + 1e-4 / 0.9999)).abs() < 1e-9);

        // ᾱ = 0.9999 at t = 0: weight = 1 / (1 + 9999)
        let w = p2_weight(&schedule, 0.0, 1.0, 1.0);
        assert!((w - 1e-4).abs() < 1e-9);
    }

    #[test]
    fn test_p2_weight_grows_with_noise() {
        let schedule = NoiseSchedule::default();
        let weighting = P2Weighting::default();
        let w = weighting.weights(&schedule, &[0.1, 0.5, 0.9]);
        assert!(w[0] < w[1] && w[1] < w[2]);
    }

    #[test]
    fn test_gamma_zero_is_uniform() {
        let schedule = NoiseSchedule::default();
        let weighting = P2Weighting { k: 1.0, gamma: 0.0 };
        assert!(weighting.weights(&schedule, &[0.0, 0.3, 1.0]).iter().all(|&w| w == 1.0));
    }

    #[test]
    fn test_training_t_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let t = sample_training_t(10_000, &mut rng);

        assert!(t.iter().all(|&t| (MIN_TRAINING_T..=1.0).contains(&t)));
        let at_one = t.iter().filter(|&&t| t == 1.0).count() as f64 / t.len() as f64;
        assert!(at_one > 0.04 && at_one < 0.11, "fraction at t=1: {at_one}");
    }

    #[test]
    fn test_weighted_mse_without_mask() {
        let device = Default::default();
        let schedule = NoiseSchedule::default();
        let weighting = P2Weighting { k: 1.0, gamma: 0.0 };

        let pred = Tensor::<TestBackend, 3>::from_floats([[[1.0, 2.0]], [[0.0, 0.0]]], &device);
        let target = Tensor::<TestBackend, 3>::zeros([2, 1, 2], &device);
        let loss = p2_weighted_mse(pred, target, &[0.5, 0.5], &schedule, &weighting, None);

        // (1 + 4 + 0 + 0) / 4
        assert!((scalar(loss) - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_mse_applies_per_sample_weight() {
        let device = Default::default();
        let schedule = NoiseSchedule::default();
        let weighting = P2Weighting::default();

        let pred = Tensor::<TestBackend, 3>::ones([2, 1, 1], &device);
        let target = Tensor::<TestBackend, 3>::zeros([2, 1, 1], &device);
        let loss = p2_weighted_mse(pred, target, &[0.2, 0.8], &schedule, &weighting, None);

        let expected = (weighting.weight(&schedule, 0.2) + weighting.weight(&schedule, 0.8)) / 2.0;
        assert!((scalar(loss) as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_mask_excludes_unknown_atoms() {
        let device = Default::default();

        let pred = Tensor::<TestBackend, 3>::from_floats([[[1.0, 100.0, 3.0]]], &device);
        let target = Tensor::<TestBackend, 3>::zeros([1, 1, 3], &device);
        let mask = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0, 1.0]]], &device);

        assert!((scalar(masked_l1(pred, target, Some(mask))) - 2.0).abs() < 1e-6);
    }
}
