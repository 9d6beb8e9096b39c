//! Forward diffusion: corrupting clean samples to a given progress value
//!
//! ```text
//! x_t = √ᾱ(t) · x + √(1 - ᾱ(t)) · ε
//! ```

use burn::prelude::*;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::scheduler::NoiseSchedule;

/// Standard normal tensor drawn from `rng`
///
/// Every noise tensor in the workspace comes from here, so a seeded generator
/// reproduces a run exactly.
pub fn randn<B: Backend, const D: usize, R: Rng + ?Sized>(
    shape: [usize; D],
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, D> {
    let numel = shape.iter().product();
    let values: Vec<f32> = (0..numel).map(|_| rng.sample(StandardNormal)).collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Per-sample scalars as a [batch, 1, 1] tensor that broadcasts over a sample
pub fn batch_scalars<B: Backend>(values: &[f64], device: &B::Device) -> Tensor<B, 3> {
    let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(data, [values.len(), 1, 1]), device)
}

/// Diffuses `x` to progress values `t` (one per batch entry) with fresh noise
///
/// Returns the noisy sample and the noise that was added.
pub fn diffuse<B: Backend, R: Rng + ?Sized>(
    schedule: &NoiseSchedule,
    x: Tensor<B, 3>,
    t: &[f64],
    rng: &mut R,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let noise = randn(x.dims(), rng, &x.device());
    let x_t = diffuse_with_noise(schedule, x, t, noise.clone());
    (x_t, noise)
}

/// Diffuses `x` to progress values `t` using the supplied noise
pub fn diffuse_with_noise<B: Backend>(
    schedule: &NoiseSchedule,
    x: Tensor<B, 3>,
    t: &[f64],
    noise: Tensor<B, 3>,
) -> Tensor<B, 3> {
    let [batch, _, _] = x.dims();
    assert_eq!(t.len(), batch, "one progress value per batch entry");

    let alpha = schedule.alpha_cumprod_batch(t);
    let signal: Vec<f64> = alpha.iter().map(|a| a.sqrt()).collect();
    let noise_scale: Vec<f64> = alpha.iter().map(|a| (1.0 - a).sqrt()).collect();

    let device = x.device();
    x * batch_scalars(&signal, &device) + noise * batch_scalars(&noise_scale, &device)
}
