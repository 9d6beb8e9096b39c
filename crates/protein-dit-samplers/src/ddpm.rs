//! DDPM-style ancestral sampler
//!
//! The stochastic DDPM reverse step, expressed on
//! continuous progress values:
//!
//! ```text
//! α = ᾱ(t) / ᾱ(t_prev)
//! μ = α^(-1/2) · (x_t - (1 - α) / √(1 - ᾱ(t)) · ε̂)
//! σ = √((1 - α)(1 - ᾱ(t_prev)) / (1 - ᾱ(t)))
//! x_{t_prev} = μ + σ · z
//! ```
//!
//! The noise term is dropped for every sample whose `t_prev` is exactly 0.

use std::marker::PhantomData;

use burn::prelude::*;
use rand::RngCore;

use crate::diffusion::{batch_scalars, randn};
use crate::sampler::{alpha_pairs, Sampler};
use crate::scheduler::NoiseSchedule;

/// Ancestral (DDPM-style) sampler
pub struct AncestralSampler<B: Backend> {
    schedule: NoiseSchedule,
    steps: usize,
    _marker: PhantomData<B>,
}

impl<B: Backend> AncestralSampler<B> {
    pub fn new(schedule: NoiseSchedule) -> Self {
        Self {
            schedule,
            steps: 0,
            _marker: PhantomData,
        }
    }

    /// Reverse step with caller-supplied noise `z`
    pub fn step_with_noise(
        &mut self,
        x: Tensor<B, 3>,
        t: &[f64],
        t_prev: &[f64],
        predicted_noise: Tensor<B, 3>,
        noise: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let [batch, _, _] = x.dims();
        assert_eq!(t.len(), batch, "one progress value per batch entry");

        let mut x_coeff = Vec::with_capacity(batch);
        let mut eps_coeff = Vec::with_capacity(batch);
        let mut sigma = Vec::with_capacity(batch);

        for ((a_t, a_prev), &tp) in alpha_pairs(&self.schedule, t, t_prev).into_iter().zip(t_prev) {
            let alpha = a_t / a_prev;
            let inv_sqrt_alpha = alpha.sqrt().recip();
            x_coeff.push(inv_sqrt_alpha);
            eps_coeff.push(inv_sqrt_alpha * (1.0 - alpha) / (1.0 - a_t).sqrt());

            let variance = ((1.0 - alpha) * (1.0 - a_prev) / (1.0 - a_t)).max(0.0);
            sigma.push(if tp == 0.0 { 0.0 } else { variance.sqrt() });
        }

        self.steps += 1;

        let device = x.device();
        x * batch_scalars(&x_coeff, &device) - predicted_noise * batch_scalars(&eps_coeff, &device)
            + noise * batch_scalars(&sigma, &device)
    }
}

impl<B: Backend> Sampler<B> for AncestralSampler<B> {
    fn step(
        &mut self,
        x: Tensor<B, 3>,
        t: &[f64],
        t_prev: &[f64],
        predicted_noise: Tensor<B, 3>,
        rng: &mut dyn RngCore,
    ) -> Tensor<B, 3> {
        let noise = randn(x.dims(), rng, &x.device());
        self.step_with_noise(x, t, t_prev, predicted_noise, noise)
    }

    fn step_count(&self) -> usize {
        self.steps
    }
}
