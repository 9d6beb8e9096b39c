//! Two-layer feed-forward network with tanh-approximated GELU

use burn::nn::Linear;
use burn::prelude::*;

use crate::init::xavier_linear;

/// Feed-forward expansion used inside every DiT block
///
/// # Architecture
///
/// ```text
/// output = fc2(gelu_tanh(fc1(x)))
/// ```
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    /// Expansion [d_model -> ratio * d_model]
    pub fc1: Linear<B>,
    /// Contraction [ratio * d_model -> d_model]
    pub fc2: Linear<B>,
}

/// Configuration for Mlp
#[derive(Debug, Clone)]
pub struct MlpConfig {
    /// Input/output dimension
    pub d_model: usize,
    /// Expansion ratio of the hidden layer
    pub ratio: usize,
    /// Whether the linear layers carry a bias
    pub bias: bool,
}

impl MlpConfig {
    /// Creates a config with bias enabled
    pub fn new(d_model: usize, ratio: usize) -> Self {
        Self {
            d_model,
            ratio,
            bias: true,
        }
    }

    /// Sets whether the linear layers carry a bias
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Initialize the module
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        let hidden = self.d_model * self.ratio;
        Mlp {
            fc1: xavier_linear(self.d_model, hidden, self.bias, device),
            fc2: xavier_linear(hidden, self.d_model, self.bias, device),
        }
    }
}

impl<B: Backend> Mlp<B> {
    /// Applies the feed-forward network to [batch, seq_len, d_model]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = gelu_tanh(x);
        self.fc2.forward(x)
    }
}

/// GELU with the tanh approximation
///
/// ```text
/// 0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))
/// ```
pub fn gelu_tanh<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let k = (2.0 / std::f64::consts::PI).sqrt();
    let inner = (x.clone() + x.clone().powi_scalar(3) * 0.044715) * k;
    x * (inner.tanh() + 1.0) * 0.5
}
