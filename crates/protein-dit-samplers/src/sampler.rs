//! Common sampler interface and sampler selection

use std::str::FromStr;

use burn::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ddim::DeterministicSampler;
use crate::ddpm::AncestralSampler;
use crate::diffusion::randn;
use crate::error::ConfigError;
use crate::scheduler::NoiseSchedule;

/// A reverse-diffusion update rule
///
/// Given the current sample at progress `t` and the model's noise estimate,
/// produces the sample at the earlier progress value `t_prev`. Progress
/// values are per batch entry.
pub trait Sampler<B: Backend> {
    /// Advances `x` from `t` to `t_prev`
    fn step(
        &mut self,
        x: Tensor<B, 3>,
        t: &[f64],
        t_prev: &[f64],
        predicted_noise: Tensor<B, 3>,
        rng: &mut dyn RngCore,
    ) -> Tensor<B, 3>;

    /// Number of `step` calls made so far
    fn step_count(&self) -> usize;

    /// Starting sample of pure standard-normal noise
    fn init_x(&self, shape: [usize; 3], rng: &mut dyn RngCore, device: &B::Device) -> Tensor<B, 3> {
        randn(shape, rng, device)
    }
}

/// Sampler selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Stochastic DDPM-style ancestral sampling
    #[default]
    #[serde(alias = "ddpm")]
    Ancestral,
    /// Deterministic DDIM-style sampling
    #[serde(alias = "ddim")]
    Deterministic,
}

impl SamplerKind {
    /// Builds a fresh sampler over `schedule`
    pub fn build<B: Backend>(&self, schedule: &NoiseSchedule) -> Box<dyn Sampler<B>> {
        match self {
            Self::Ancestral => Box::new(AncestralSampler::new(schedule.clone())),
            Self::Deterministic => Box::new(DeterministicSampler::new(schedule.clone())),
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ancestral => "ancestral",
            Self::Deterministic => "deterministic",
        }
    }
}

impl FromStr for SamplerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ancestral" | "ddpm" => Ok(Self::Ancestral),
            "deterministic" | "ddim" => Ok(Self::Deterministic),
            other => Err(ConfigError::UnknownSampler(other.to_string())),
        }
    }
}

/// Per-sample ᾱ at `t` and `t_prev`
pub(crate) fn alpha_pairs(schedule: &NoiseSchedule, t: &[f64], t_prev: &[f64]) -> Vec<(f64, f64)> {
    assert_eq!(t.len(), t_prev.len(), "t and t_prev must have the same length");
    t.iter()
        .zip(t_prev)
        .map(|(&t, &t_prev)| (schedule.alpha_cumprod(t), schedule.alpha_cumprod(t_prev)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!("ancestral".parse::<SamplerKind>(), Ok(SamplerKind::Ancestral));
        assert_eq!("ddpm".parse::<SamplerKind>(), Ok(SamplerKind::Ancestral));
        assert_eq!("Deterministic".parse::<SamplerKind>(), Ok(SamplerKind::Deterministic));
        assert_eq!("ddim".parse::<SamplerKind>(), Ok(SamplerKind::Deterministic));
        assert_eq!(
            "euler".parse::<SamplerKind>(),
            Err(ConfigError::UnknownSampler("euler".to_string()))
        );
    }

    #[test]
    fn test_built_samplers_count_steps() {
        let device = Default::default();
        let schedule = NoiseSchedule::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        for kind in [SamplerKind::Ancestral, SamplerKind::Deterministic] {
            let mut sampler = kind.build::<TestBackend>(&schedule);
            assert_eq!(sampler.step_count(), 0);

            let x = sampler.init_x([1, 4, 12], &mut rng, &device);
            let eps = Tensor::zeros([1, 4, 12], &device);
            let x = sampler.step(x, &[1.0], &[0.5], eps.clone(), &mut rng);
            sampler.step(x, &[0.5], &[0.0], eps, &mut rng);

            assert_eq!(sampler.step_count(), 2, "{}", kind.name());
        }
    }
}
