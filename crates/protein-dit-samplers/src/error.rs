//! Configuration errors raised before any sampling computation starts

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown sampler: {0} (expected ancestral/ddpm or deterministic/ddim)")]
    UnknownSampler(String),
    #[error("unknown step schedule: {0} (expected linear or ays)")]
    UnknownStepSchedule(String),
    #[error("number of sampling steps must be at least 1")]
    InvalidStepCount,
    #[error("progress range must lie in [0, 1] with t_start >= t_end, got t_start={t_start}, t_end={t_end}")]
    InvalidProgressRange { t_start: f64, t_end: f64 },
    #[error("invalid noise schedule: {0}")]
    InvalidNoiseSchedule(String),
    #[error("an inpainting mask requires an initial sample")]
    MaskWithoutSeed,
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },
}
