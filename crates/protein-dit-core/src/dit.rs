//! Diffusion Transformer (DiT) blocks with adaLN-Zero conditioning
//!
//! Every block derives a per-sample shift, scale and gate from the timestep
//! conditioning vector. The layer producing them starts at exactly zero, so a
//! freshly initialised block returns its input unchanged.
//!
//! # References
//!
//! - [Scalable Diffusion Models with Transformers](https://arxiv.org/abs/2212.09748)

use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::activation::silu;

use crate::attention::{SelfAttention, SelfAttentionConfig};
use crate::init::{xavier_linear, zero_linear};
use crate::layernorm::layer_norm;
use crate::mlp::{Mlp, MlpConfig};

/// Applies `x * (1 + scale) + shift`
///
/// `shift` and `scale` are [batch, 1, hidden] and broadcast over the sequence.
pub fn modulate<B: Backend>(x: Tensor<B, 3>, shift: Tensor<B, 3>, scale: Tensor<B, 3>) -> Tensor<B, 3> {
    x * (scale + 1.0) + shift
}

/// Splits a [batch, N * hidden] modulation output into `N` chunks of
/// [batch, 1, hidden], in order
pub fn split_modulation<B: Backend, const N: usize>(params: Tensor<B, 2>) -> [Tensor<B, 3>; N] {
    let [batch, width] = params.dims();
    let hidden = width / N;
    let params = params.reshape([batch, N, hidden]);
    core::array::from_fn(|i| params.clone().slice([0..batch, i..i + 1, 0..hidden]))
}

/// DiT block with adaLN-Zero
///
/// ```text
/// shift1, scale1, gate1, shift2, scale2, gate2 = modulation(silu(c))
/// x = x + gate1 * attn(modulate(norm(x), shift1, scale1))
/// x = x + gate2 * mlp(modulate(norm(x), shift2, scale2))
/// ```
#[derive(Module, Debug)]
pub struct DiTBlock<B: Backend> {
    /// Self-attention
    pub attention: SelfAttention<B>,
    /// Feed-forward network
    pub mlp: Mlp<B>,
    /// Conditioning -> 6 * hidden (zero-initialised)
    pub modulation: Linear<B>,
    /// Layer norm epsilon
    pub norm_eps: f64,
}

/// Configuration for DiTBlock
#[derive(Debug, Clone)]
pub struct DiTBlockConfig {
    /// Model width (also the conditioning width)
    pub hidden_size: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Dimension per head
    pub head_dim: usize,
    /// MLP expansion ratio
    pub mlp_ratio: usize,
    /// Bias on the fused QKV projection
    pub qkv_bias: bool,
    /// Bias on the attention output projection
    pub attn_proj_bias: bool,
    /// Bias on the MLP layers
    pub mlp_bias: bool,
    /// Layer norm epsilon
    pub norm_eps: f64,
}

impl DiTBlockConfig {
    /// Creates a config with head_dim = hidden_size / num_heads
    pub fn new(hidden_size: usize, num_heads: usize, mlp_ratio: usize) -> Self {
        Self {
            hidden_size,
            num_heads,
            head_dim: hidden_size / num_heads,
            mlp_ratio,
            qkv_bias: true,
            attn_proj_bias: true,
            mlp_bias: true,
            norm_eps: 1e-6,
        }
    }

    pub fn with_head_dim(mut self, head_dim: usize) -> Self {
        self.head_dim = head_dim;
        self
    }

    pub fn with_bias(mut self, qkv_bias: bool, attn_proj_bias: bool, mlp_bias: bool) -> Self {
        self.qkv_bias = qkv_bias;
        self.attn_proj_bias = attn_proj_bias;
        self.mlp_bias = mlp_bias;
        self
    }

    pub fn with_norm_eps(mut self, norm_eps: f64) -> Self {
        self.norm_eps = norm_eps;
        self
    }

    /// Initialize the block
    pub fn init<B: Backend>(&self, device: &B::Device) -> DiTBlock<B> {
        DiTBlock {
            attention: SelfAttentionConfig::new(self.hidden_size, self.num_heads)
                .with_head_dim(self.head_dim)
                .with_bias(self.qkv_bias, self.attn_proj_bias)
                .init(device),
            mlp: MlpConfig::new(self.hidden_size, self.mlp_ratio)
                .with_bias(self.mlp_bias)
                .init(device),
            modulation: zero_linear(self.hidden_size, 6 * self.hidden_size, device),
            norm_eps: self.norm_eps,
        }
    }
}

impl<B: Backend> DiTBlock<B> {
    /// Forward pass through the block
    ///
    /// # Arguments
    ///
    /// * `x` - Residual stream [batch, seq_len, hidden]
    /// * `cond` - Conditioning vector [batch, hidden]
    /// * `mask` - Optional attention mask [batch, seq_len, seq_len]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        cond: Tensor<B, 2>,
        mask: Option<Tensor<B, 3, Bool>>,
    ) -> Tensor<B, 3> {
        let [shift_msa, scale_msa, gate_msa, shift_mlp, scale_mlp, gate_mlp] =
            split_modulation(self.modulation.forward(silu(cond)));

        let h = modulate(layer_norm(x.clone(), self.norm_eps), shift_msa, scale_msa);
        let x = x + gate_msa * self.attention.forward(h, mask);

        let h = modulate(layer_norm(x.clone(), self.norm_eps), shift_mlp, scale_mlp);
        x + gate_mlp * self.mlp.forward(h)
    }
}

/// Final DiT layer: adaLN modulation followed by the output heads
///
/// The mean head is zero-initialised. The optional variance head keeps a
/// xavier initialisation.
#[derive(Module, Debug)]
pub struct FinalLayer<B: Backend> {
    /// Conditioning -> 2 * hidden (shift, scale), zero-initialised
    pub modulation: Linear<B>,
    /// Mean head [hidden -> out_dim], zero-initialised
    pub mean: Linear<B>,
    /// Variance head [hidden -> out_dim]
    pub variance: Option<Linear<B>>,
    /// Layer norm epsilon
    pub norm_eps: f64,
}

/// Configuration for FinalLayer
#[derive(Debug, Clone)]
pub struct FinalLayerConfig {
    /// Model width
    pub hidden_size: usize,
    /// Output feature width
    pub out_dim: usize,
    /// Whether to build the variance head
    pub learn_variance: bool,
}

impl FinalLayerConfig {
    pub fn new(hidden_size: usize, out_dim: usize, learn_variance: bool) -> Self {
        Self {
            hidden_size,
            out_dim,
            learn_variance,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FinalLayer<B> {
        FinalLayer {
            modulation: zero_linear(self.hidden_size, 2 * self.hidden_size, device),
            mean: zero_linear(self.hidden_size, self.out_dim, device),
            variance: self
                .learn_variance
                .then(|| xavier_linear(self.hidden_size, self.out_dim, true, device)),
            norm_eps: 1e-6,
        }
    }
}

impl<B: Backend> FinalLayer<B> {
    /// Returns the raw mean head output and, when enabled, the raw
    /// (pre-sigmoid) variance head output, both [batch, seq_len, out_dim]
    pub fn forward(&self, x: Tensor<B, 3>, cond: Tensor<B, 2>) -> (Tensor<B, 3>, Option<Tensor<B, 3>>) {
        let [shift, scale] = split_modulation(self.modulation.forward(silu(cond)));

        let h = modulate(layer_norm(x, self.norm_eps), shift, scale);
        let variance = self.variance.as_ref().map(|head| head.forward(h.clone()));
        (self.mean.forward(h), variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn to_vec<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_split_modulation_order() {
        let device = Default::default();
        // batch 1, 3 chunks of width 2
        let params = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]], &device);
        let chunks: [Tensor<TestBackend, 3>; 3] = split_modulation(params);

        assert_eq!(chunks[0].dims(), [1, 1, 2]);
        assert_eq!(to_vec(chunks[1].clone()), vec![2.0, 3.0]);
        assert_eq!(to_vec(chunks[2].clone()), vec![4.0, 5.0]);
    }

    #[test]
    fn test_modulate() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::from_floats([[[1.0, 2.0]]], &device);
        let shift = Tensor::<TestBackend, 3>::from_floats([[[0.5, -0.5]]], &device);
        let scale = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0]]], &device);

        assert_eq!(to_vec(modulate(x, shift, scale)), vec![2.5, 1.5]);
    }

    #[test]
    fn test_dit_block_shape() {
        let device = Default::default();
        let block = DiTBlockConfig::new(64, 4, 4).init::<TestBackend>(&device);

        let x = Tensor::zeros([2, 12, 64], &device);
        let cond = Tensor::zeros([2, 64], &device);
        assert_eq!(block.forward(x, cond, None).dims(), [2, 12, 64]);
    }

    #[test]
    fn test_zero_initialised_block_is_identity() {
        let device = Default::default();
        let block = DiTBlockConfig::new(32, 2, 4).init::<TestBackend>(&device);

        let x: Tensor<TestBackend, 3> =
            Tensor::random([2, 9, 32], Distribution::Normal(0.0, 1.0), &device);
        let cond: Tensor<TestBackend, 2> =
            Tensor::random([2, 32], Distribution::Normal(0.0, 1.0), &device);

        let y = block.forward(x.clone(), cond, None);
        assert_eq!(to_vec(y), to_vec(x));
    }

    #[test]
    fn test_final_layer_heads() {
        let device = Default::default();
        let layer = FinalLayerConfig::new(32, 12, true).init::<TestBackend>(&device);

        let x: Tensor<TestBackend, 3> =
            Tensor::random([1, 5, 32], Distribution::Normal(0.0, 1.0), &device);
        let cond = Tensor::zeros([1, 32], &device);
        let (mean, variance) = layer.forward(x, cond);

        assert_eq!(mean.dims(), [1, 5, 12]);
        assert!(to_vec(mean).iter().all(|&v| v == 0.0));
        assert_eq!(variance.map(|v| v.dims()), Some([1, 5, 12]));
    }

    #[test]
    fn test_final_layer_without_variance() {
        let device = Default::default();
        let layer = FinalLayerConfig::new(16, 12, false).init::<TestBackend>(&device);

        let (_, variance) = layer.forward(Tensor::zeros([1, 3, 16], &device), Tensor::zeros([1, 16], &device));
        assert!(variance.is_none());
    }
}
