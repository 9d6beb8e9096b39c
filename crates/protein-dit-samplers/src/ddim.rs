//! DDIM-style deterministic sampler
//!
//! Recovers the clean-sample estimate from the noise prediction and re-diffuses
//! it to the earlier progress value with the same noise estimate.
//!
//! ```text
//! x̂₀ = (x_t - √(1 - ᾱ(t)) · ε̂) / √ᾱ(t)
//! x_{t_prev} = √ᾱ(t_prev) · x̂₀ + √(1 - ᾱ(t_prev)) · ε̂
//! ```

use std::marker::PhantomData;

use burn::prelude::*;
use rand::RngCore;

use crate::diffusion::batch_scalars;
use crate::sampler::{alpha_pairs, Sampler};
use crate::scheduler::NoiseSchedule;

/// Deterministic (DDIM-style) sampler
pub struct DeterministicSampler<B: Backend> {
    schedule: NoiseSchedule,
    steps: usize,
    _marker: PhantomData<B>,
}

impl<B: Backend> DeterministicSampler<B> {
    pub fn new(schedule: NoiseSchedule) -> Self {
        Self {
            schedule,
            steps: 0,
            _marker: PhantomData,
        }
    }

    /// Clean-sample estimate x̂₀ at progress values `t`
    pub fn predict_x0(&self, x: Tensor<B, 3>, t: &[f64], predicted_noise: Tensor<B, 3>) -> Tensor<B, 3> {
        let alpha = self.schedule.alpha_cumprod_batch(t);
        let noise_scale: Vec<f64> = alpha.iter().map(|a| (1.0 - a).sqrt()).collect();
        let inv_signal: Vec<f64> = alpha.iter().map(|a| a.sqrt().recip()).collect();

        let device = x.device();
        (x - predicted_noise * batch_scalars(&noise_scale, &device)) * batch_scalars(&inv_signal, &device)
    }
}

impl<B: Backend> Sampler<B> for DeterministicSampler<B> {
    fn step(
        &mut self,
        x: Tensor<B, 3>,
        t: &[f64],
        t_prev: &[f64],
        predicted_noise: Tensor<B, 3>,
        _rng: &mut dyn RngCore,
    ) -> Tensor<B, 3> {
        let [batch, _, _] = x.dims();
        assert_eq!(t.len(), batch, "one progress value per batch entry");

        let (signal, noise_scale): (Vec<f64>, Vec<f64>) = alpha_pairs(&self.schedule, t, t_prev)
            .into_iter()
            .map(|(_, a_prev)| (a_prev.sqrt(), (1.0 - a_prev).sqrt()))
            .unzip();

        let device = x.device();
        let x0 = self.predict_x0(x, t, predicted_noise.clone());
        self.steps += 1;

        x0 * batch_scalars(&signal, &device) + predicted_noise * batch_scalars(&noise_scale, &device)
    }

    fn step_count(&self) -> usize {
        self.steps
    }
}
