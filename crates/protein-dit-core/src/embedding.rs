//! Timestep and positional embeddings
//!
//! - [`TimestepEmbedder`] turns a batch of continuous progress values into the
//!   conditioning vector shared by every block.
//! - [`sinusoidal_positions`] builds the fixed positional table added to the
//!   residue embeddings.

use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::activation::silu;

use crate::init::normal_linear;

/// Embeds scalar timesteps into vector representations
///
/// ```text
/// emb = [cos(t * f_i), sin(t * f_i)]   f_i = exp(-ln(max_period) * i / half)
/// out = linear2(silu(linear1(emb)))
/// ```
#[derive(Module, Debug)]
pub struct TimestepEmbedder<B: Backend> {
    pub linear1: Linear<B>,
    pub linear2: Linear<B>,
    /// Precomputed log-spaced frequencies [frequency_dim / 2]
    pub freqs: Tensor<B, 1>,
    /// Width of the sinusoidal embedding fed to `linear1`
    pub frequency_dim: usize,
}

/// Configuration for TimestepEmbedder
#[derive(Debug, Clone)]
pub struct TimestepEmbedderConfig {
    /// Output (model) width
    pub d_model: usize,
    /// Width of the sinusoidal frequency embedding
    pub frequency_dim: usize,
    /// Controls the minimum frequency
    pub max_period: f64,
    /// Standard deviation of the MLP weight initialisation
    pub init_std: f64,
}

impl TimestepEmbedderConfig {
    pub fn new(d_model: usize, frequency_dim: usize) -> Self {
        Self {
            d_model,
            frequency_dim,
            max_period: 10000.0,
            init_std: 0.02,
        }
    }

    pub fn with_max_period(mut self, max_period: f64) -> Self {
        self.max_period = max_period;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> TimestepEmbedder<B> {
        TimestepEmbedder {
            linear1: normal_linear(self.frequency_dim, self.d_model, self.init_std, device),
            linear2: normal_linear(self.d_model, self.d_model, self.init_std, device),
            freqs: timestep_frequencies(self.frequency_dim, self.max_period, device),
            frequency_dim: self.frequency_dim,
        }
    }
}

/// Log-spaced frequencies for the timestep embedding
pub fn timestep_frequencies<B: Backend>(
    frequency_dim: usize,
    max_period: f64,
    device: &B::Device,
) -> Tensor<B, 1> {
    let half = frequency_dim / 2;
    let freqs: Vec<f32> = (0..half)
        .map(|i| (-(max_period.ln()) * i as f64 / half as f64).exp() as f32)
        .collect();
    Tensor::from_data(TensorData::new(freqs, [half]), device)
}

impl<B: Backend> TimestepEmbedder<B> {
    /// Sinusoidal embedding of `t` [batch] -> [batch, frequency_dim]
    ///
    /// Odd widths are padded with one zero column.
    pub fn frequency_embedding(&self, t: Tensor<B, 1>) -> Tensor<B, 2> {
        let [batch] = t.dims();
        let angles = t
            .unsqueeze_dim::<2>(1)
            .matmul(self.freqs.clone().unsqueeze_dim::<2>(0));

        let emb = Tensor::cat(vec![angles.clone().cos(), angles.sin()], 1);
        if self.frequency_dim % 2 == 1 {
            let pad = Tensor::zeros([batch, 1], &emb.device());
            Tensor::cat(vec![emb, pad], 1)
        } else {
            emb
        }
    }

    /// Conditioning vector [batch, d_model]
    pub fn forward(&self, t: Tensor<B, 1>) -> Tensor<B, 2> {
        let x = self.linear1.forward(self.frequency_embedding(t));
        self.linear2.forward(silu(x))
    }
}

/// Fixed sinusoidal positional table [seq_len, d_model]
///
/// Even channels hold `sin(pos * w_i)`, odd channels `cos(pos * w_i)`, with
/// `w_i = exp(-2i * ln(10000) / d_model)`. `d_model` must be even.
pub fn sinusoidal_positions<B: Backend>(
    seq_len: usize,
    d_model: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let mut table = vec![0.0f32; seq_len * d_model];
    let log_base = 10000.0f64.ln() / d_model as f64;
    for pos in 0..seq_len {
        for i in (0..d_model).step_by(2) {
            let angle = pos as f64 * (-(i as f64) * log_base).exp();
            table[pos * d_model + i] = angle.sin() as f32;
            if i + 1 < d_model {
                table[pos * d_model + i + 1] = angle.cos() as f32;
            }
        }
    }
    Tensor::from_data(TensorData::new(table, [seq_len, d_model]), device)
}
