//! Noise and step schedules
//!
//! [`NoiseSchedule`] maps a continuous progress value t in [0, 1] to the
//! cumulative signal coefficient ᾱ(t) of the cosine schedule. [`StepSchedule`]
//! picks the progress values visited during sampling.

use std::f64::consts::FRAC_PI_2;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// Cosine noise schedule
// ============================================================================

/// Noise schedule configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseScheduleConfig {
    /// Offset keeping ᾱ away from 1 near t = 0
    pub s: f64,
    /// Reparameterisation exponent applied to t before the cosine
    pub scaler: f64,
    /// Bounds ᾱ is clamped into
    pub clamp_range: (f64, f64),
    /// Precompute ᾱ on this many evenly spaced t values
    pub cache_steps: Option<usize>,
}

impl Default for NoiseScheduleConfig {
    fn default() -> Self {
        Self {
            s: 0.008,
            scaler: 1.0,
            clamp_range: (1e-4, 0.9999),
            cache_steps: None,
        }
    }
}

impl NoiseScheduleConfig {
    pub fn with_scaler(mut self, scaler: f64) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_cache_steps(mut self, steps: usize) -> Self {
        self.cache_steps = Some(steps);
        self
    }

    /// Validates the configuration and builds the schedule
    pub fn init(&self) -> Result<NoiseSchedule, ConfigError> {
        let (lo, hi) = self.clamp_range;
        if !(lo > 0.0 && hi < 1.0 && lo < hi) {
            return Err(ConfigError::InvalidNoiseSchedule(format!(
                "clamp range must satisfy 0 < min < max < 1, got ({lo}, {hi})"
            )));
        }
        if !(self.s >= 0.0) {
            return Err(ConfigError::InvalidNoiseSchedule(format!(
                "offset s must be non-negative, got {}",
                self.s
            )));
        }
        if !(self.scaler > 0.0) {
            return Err(ConfigError::InvalidNoiseSchedule(format!(
                "scaler must be positive, got {}",
                self.scaler
            )));
        }

        let mut schedule = NoiseSchedule {
            s: self.s,
            scaler: self.scaler,
            clamp_range: self.clamp_range,
            cache: None,
        };

        if let Some(steps) = self.cache_steps {
            if steps < 2 {
                return Err(ConfigError::InvalidNoiseSchedule(format!(
                    "cache needs at least 2 steps, got {steps}"
                )));
            }
            let table = (0..steps)
                .map(|i| schedule.compute(i as f64 / (steps - 1) as f64))
                .collect();
            schedule.cache = Some(table);
        }

        Ok(schedule)
    }
}

/// Cosine schedule of the cumulative signal coefficient
///
/// ```text
/// ᾱ(t) = clamp(cos((t' + s) / (1 + s) · π/2), 0, 1)² / cos(s / (1 + s) · π/2)²
/// ```
///
/// Immutable after construction; share it freely between sampling calls.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    s: f64,
    scaler: f64,
    clamp_range: (f64, f64),
    cache: Option<Vec<f64>>,
}

impl Default for NoiseSchedule {
    fn default() -> Self {
        Self {
            s: 0.008,
            scaler: 1.0,
            clamp_range: (1e-4, 0.9999),
            cache: None,
        }
    }
}

impl NoiseSchedule {
    /// ᾱ at progress value `t`
    pub fn alpha_cumprod(&self, t: f64) -> f64 {
        match &self.cache {
            Some(table) => {
                let last = table.len() - 1;
                let idx = (t * last as f64).round().clamp(0.0, last as f64) as usize;
                table[idx]
            }
            None => self.compute(t),
        }
    }

    /// ᾱ for every entry of a batch of progress values
    pub fn alpha_cumprod_batch(&self, t: &[f64]) -> Vec<f64> {
        t.iter().map(|&t| self.alpha_cumprod(t)).collect()
    }

    /// Number of cached entries, if the schedule is discretised
    pub fn cache_steps(&self) -> Option<usize> {
        self.cache.as_ref().map(Vec::len)
    }

    fn compute(&self, t: f64) -> f64 {
        let t = self.reparameterize(t);
        let angle = |v: f64| (v + self.s) / (1.0 + self.s) * FRAC_PI_2;
        let f = angle(t).cos().clamp(0.0, 1.0).powi(2);
        let f0 = angle(0.0).cos().powi(2);
        (f / f0).clamp(self.clamp_range.0, self.clamp_range.1)
    }

    fn reparameterize(&self, t: f64) -> f64 {
        if self.scaler > 1.0 {
            1.0 - (1.0 - t).powf(self.scaler)
        } else if self.scaler < 1.0 {
            t.powf(self.scaler)
        } else {
            t
        }
    }
}

// ============================================================================
// Step schedules
// ============================================================================

/// Spacing of the progress values visited during sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepSchedule {
    /// Evenly spaced
    #[default]
    Linear,
    /// Align-your-steps: evenly spaced in atan space, denser near t_end
    #[serde(rename = "ays", alias = "align_your_steps")]
    AlignYourSteps,
}

impl StepSchedule {
    /// Returns `num_steps + 1` progress values from `t_start` to `t_end`
    pub fn progress_values(&self, num_steps: usize, t_start: f64, t_end: f64) -> Vec<f64> {
        let n = num_steps as f64;
        (0..=num_steps)
            .map(|i| {
                let frac = i as f64 / n;
                match self {
                    Self::Linear => t_start + (t_end - t_start) * frac,
                    Self::AlignYourSteps => {
                        ((1.0 - frac) * t_start.atan() + frac * t_end.atan()).tan()
                    }
                }
            })
            .collect()
    }
}

impl FromStr for StepSchedule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "ays" | "align_your_steps" => Ok(Self::AlignYourSteps),
            other => Err(ConfigError::UnknownStepSchedule(other.to_string())),
        }
    }
}
