//! Explicit weight initialisation for linear layers
//!
//! Every linear layer in the denoiser is built through one of these helpers so
//! the starting parameters never depend on framework defaults.

use burn::module::Param;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;

/// Linear layer with xavier-uniform weight and zero bias
pub fn xavier_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    bias: bool,
    device: &B::Device,
) -> Linear<B> {
    let linear = LinearConfig::new(d_input, d_output)
        .with_bias(bias)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device);
    with_zero_bias(linear, d_output, device)
}

/// Linear layer with normal(0, std) weight and zero bias
pub fn normal_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    std: f64,
    device: &B::Device,
) -> Linear<B> {
    let linear = LinearConfig::new(d_input, d_output)
        .with_bias(true)
        .with_initializer(Initializer::Normal { mean: 0.0, std })
        .init(device);
    with_zero_bias(linear, d_output, device)
}

/// Linear layer whose weight and bias are exactly zero
///
/// Used for every layer whose output must vanish at initialisation
/// (adaLN modulation outputs and the mean head).
pub fn zero_linear<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_input, d_output)
        .with_bias(true)
        .with_initializer(Initializer::Zeros)
        .init(device)
}

fn with_zero_bias<B: Backend>(mut linear: Linear<B>, d_output: usize, device: &B::Device) -> Linear<B> {
    if linear.bias.is_some() {
        linear.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));
    }
    linear
}
