//! Reverse-diffusion sampling loop
//!
//! Drives a [`Denoiser`] and a [`Sampler`] over a schedule of progress
//! values, optionally pinning a known region of a seed sample (inpainting).

use burn::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diffusion::diffuse;
use crate::error::ConfigError;
use crate::sampler::SamplerKind;
use crate::scheduler::{NoiseSchedule, StepSchedule};

/// A model that estimates the noise present in a sample
pub trait Denoiser<B: Backend> {
    /// Extra inputs the model needs besides the sample and progress values
    type Conditioning;

    /// Predicts the noise in `x` at progress values `t` (one per batch entry)
    fn predict_noise(&self, x: Tensor<B, 3>, t: &[f64], conditioning: &Self::Conditioning) -> Tensor<B, 3>;
}

/// Sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Number of reverse steps
    pub num_steps: usize,
    /// Progress value sampling starts from
    pub t_start: f64,
    /// Progress value sampling ends at
    pub t_end: f64,
    /// Reverse update rule
    pub sampler: SamplerKind,
    /// Spacing of the visited progress values
    pub schedule: StepSchedule,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            num_steps: 20,
            t_start: 1.0,
            t_end: 0.0,
            sampler: SamplerKind::Ancestral,
            schedule: StepSchedule::Linear,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_steps == 0 {
            return Err(ConfigError::InvalidStepCount);
        }
        let in_range = |t: f64| (0.0..=1.0).contains(&t);
        if !in_range(self.t_start) || !in_range(self.t_end) || self.t_start < self.t_end {
            return Err(ConfigError::InvalidProgressRange {
                t_start: self.t_start,
                t_end: self.t_end,
            });
        }
        Ok(())
    }

    /// Progress values visited, `num_steps + 1` entries
    pub fn progress_values(&self) -> Vec<f64> {
        self.schedule
            .progress_values(self.num_steps, self.t_start, self.t_end)
    }
}

/// Optional starting material for sampling
#[derive(Debug, Clone)]
pub struct SampleInputs<B: Backend> {
    /// Seed sample: starting point, or the known content when inpainting
    pub init: Option<Tensor<B, 3>>,
    /// 1 where the seed is known and pinned, 0 where it is generated
    ///
    /// Masks that mark the regenerated region with 1 must be inverted first.
    pub inpaint_mask: Option<Tensor<B, 3>>,
}

impl<B: Backend> Default for SampleInputs<B> {
    fn default() -> Self {
        Self {
            init: None,
            inpaint_mask: None,
        }
    }
}

impl<B: Backend> SampleInputs<B> {
    /// Start from a given sample
    pub fn from_init(init: Tensor<B, 3>) -> Self {
        Self {
            init: Some(init),
            inpaint_mask: None,
        }
    }

    /// Regenerate the region where `mask` is 0, keeping `seed` where it is 1
    pub fn inpaint(seed: Tensor<B, 3>, mask: Tensor<B, 3>) -> Self {
        Self {
            init: Some(seed),
            inpaint_mask: Some(mask),
        }
    }
}

/// Progress of a sampling run, passed to the step callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Current step (0-indexed)
    pub step: usize,
    /// Total number of steps
    pub total_steps: usize,
    /// Progress value the step started from
    pub t: f64,
    /// Progress value the step moved to
    pub t_prev: f64,
}

/// Samples from `denoiser`, returning the state after every step
///
/// See [`sample_with_callback`].
#[allow(clippy::too_many_arguments)]
pub fn sample<B, D, R>(
    schedule: &NoiseSchedule,
    denoiser: &D,
    conditioning: &D::Conditioning,
    shape: [usize; 3],
    inputs: SampleInputs<B>,
    config: &SamplingConfig,
    rng: &mut R,
    device: &B::Device,
) -> Result<Vec<Tensor<B, 3>>, ConfigError>
where
    B: Backend,
    D: Denoiser<B>,
    R: Rng,
{
    sample_with_callback(schedule, denoiser, conditioning, shape, inputs, config, rng, device, |_| {})
}

/// Samples from `denoiser`, calling `on_step` after every step
///
/// The trajectory holds exactly `config.num_steps` tensors of `shape`; the
/// last one is the final sample. All configuration problems are reported
/// before the first model evaluation.
#[allow(clippy::too_many_arguments)]
pub fn sample_with_callback<B, D, R, F>(
    schedule: &NoiseSchedule,
    denoiser: &D,
    conditioning: &D::Conditioning,
    shape: [usize; 3],
    inputs: SampleInputs<B>,
    config: &SamplingConfig,
    rng: &mut R,
    device: &B::Device,
    mut on_step: F,
) -> Result<Vec<Tensor<B, 3>>, ConfigError>
where
    B: Backend,
    D: Denoiser<B>,
    R: Rng,
    F: FnMut(StepInfo),
{
    config.validate()?;

    let SampleInputs { init, inpaint_mask } = inputs;
    if let Some(init) = &init {
        check_shape(shape, init.dims())?;
    }
    let (init, inpaint) = match (init, inpaint_mask) {
        (None, Some(_)) => return Err(ConfigError::MaskWithoutSeed),
        (Some(seed), Some(mask)) => {
            check_shape(shape, mask.dims())?;
            (None, Some((seed, mask)))
        }
        (init, None) => (init, None),
    };

    let progress = config.progress_values();
    let mut sampler = config.sampler.build::<B>(schedule);
    let batch = shape[0];

    info!(
        sampler = config.sampler.name(),
        steps = config.num_steps,
        t_start = config.t_start,
        t_end = config.t_end,
        inpainting = inpaint.is_some(),
        "starting sampling"
    );

    let mut x = match init {
        Some(init) => init,
        None => sampler.init_x(shape, rng, device),
    };
    let mut trajectory = Vec::with_capacity(config.num_steps);

    for (step, pair) in progress.windows(2).enumerate() {
        let (t, t_prev) = (pair[0], pair[1]);
        let t_batch = vec![t; batch];
        let t_prev_batch = vec![t_prev; batch];

        // Re-noise the seed to the current level and pin the known region
        if let Some((seed, mask)) = &inpaint {
            let (known, _) = diffuse(schedule, seed.clone(), &t_batch, rng);
            x = x * (mask.clone().neg() + 1.0) + known * mask.clone();
        }

        let predicted_noise = denoiser.predict_noise(x.clone(), &t_batch, conditioning);
        x = sampler.step(x, &t_batch, &t_prev_batch, predicted_noise, rng);
        debug!(step, t, t_prev, "sampling step");

        on_step(StepInfo {
            step,
            total_steps: config.num_steps,
            t,
            t_prev,
        });
        trajectory.push(x.clone());
    }

    info!(steps = sampler.step_count(), "sampling finished");
    Ok(trajectory)
}

fn check_shape(expected: [usize; 3], actual: [usize; 3]) -> Result<(), ConfigError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConfigError::ShapeMismatch { expected, actual })
    }
}
