//! Diffusion schedules, samplers and the sampling loop
//!
//! Progress values `t` run from 1 (pure noise) to 0 (clean sample). The
//! [`NoiseSchedule`] maps them to the cumulative signal coefficient ᾱ,
//! [`diffusion`] corrupts clean samples, and [`sample`] runs a [`Sampler`]
//! backwards under a [`Denoiser`].

pub mod ddim;
pub mod ddpm;
pub mod diffusion;
pub mod error;
pub mod loss;
pub mod sampler;
pub mod sampling;
pub mod scheduler;

pub use ddim::DeterministicSampler;
pub use ddpm::AncestralSampler;
pub use diffusion::{batch_scalars, diffuse, diffuse_with_noise, randn};
pub use error::ConfigError;
pub use loss::{masked_l1, p2_weight, p2_weighted_mse, sample_training_t, P2Weighting};
pub use sampler::{Sampler, SamplerKind};
pub use sampling::{sample, sample_with_callback, Denoiser, SampleInputs, SamplingConfig, StepInfo};
pub use scheduler::{NoiseSchedule, NoiseScheduleConfig, StepSchedule};
