//! Masked multi-head self-attention over residue sequences
//!
//! Each sample attends only within its own sequence. Padding positions are
//! removed from the keys with a boolean mask built from the per-sample
//! residue count.

use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::init::xavier_linear;

/// Score assigned to masked key positions before the softmax
///
/// Finite so that a fully masked row degrades to uniform attention instead
/// of NaN.
const MASKED_SCORE: f32 = -1.0e9;

/// Multi-head self-attention with a fused QKV projection
#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    /// Fused query/key/value projection [d_model -> 3 * d_model]
    pub qkv: Linear<B>,
    /// Output projection
    pub proj: Linear<B>,
    /// Number of heads
    pub num_heads: usize,
    /// Dimension per head
    pub head_dim: usize,
}

/// Configuration for SelfAttention
#[derive(Debug, Clone)]
pub struct SelfAttentionConfig {
    /// Model width
    pub d_model: usize,
    /// Number of heads
    pub num_heads: usize,
    /// Dimension per head (num_heads * head_dim must equal d_model)
    pub head_dim: usize,
    /// Bias on the QKV projection
    pub qkv_bias: bool,
    /// Bias on the output projection
    pub proj_bias: bool,
}

impl SelfAttentionConfig {
    /// Creates a config with head_dim = d_model / num_heads and biases enabled
    pub fn new(d_model: usize, num_heads: usize) -> Self {
        Self {
            d_model,
            num_heads,
            head_dim: d_model / num_heads,
            qkv_bias: true,
            proj_bias: true,
        }
    }

    /// Overrides the per-head dimension
    pub fn with_head_dim(mut self, head_dim: usize) -> Self {
        self.head_dim = head_dim;
        self
    }

    /// Sets the QKV and output projection biases
    pub fn with_bias(mut self, qkv_bias: bool, proj_bias: bool) -> Self {
        self.qkv_bias = qkv_bias;
        self.proj_bias = proj_bias;
        self
    }

    /// Initialize the attention module
    pub fn init<B: Backend>(&self, device: &B::Device) -> SelfAttention<B> {
        SelfAttention {
            qkv: xavier_linear(self.d_model, 3 * self.d_model, self.qkv_bias, device),
            proj: xavier_linear(self.d_model, self.d_model, self.proj_bias, device),
            num_heads: self.num_heads,
            head_dim: self.head_dim,
        }
    }
}

impl<B: Backend> SelfAttention<B> {
    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, seq_len, d_model]
    /// * `mask` - Optional boolean mask [batch, seq_len, seq_len], `true` where
    ///   the query (row) may attend to the key (column)
    pub fn forward(&self, x: Tensor<B, 3>, mask: Option<Tensor<B, 3, Bool>>) -> Tensor<B, 3> {
        let [batch, seq_len, d_model] = x.dims();

        let qkv = self.qkv.forward(x);
        let q = qkv.clone().slice([0..batch, 0..seq_len, 0..d_model]);
        let k = qkv
            .clone()
            .slice([0..batch, 0..seq_len, d_model..(2 * d_model)]);
        let v = qkv.slice([0..batch, 0..seq_len, (2 * d_model)..(3 * d_model)]);

        // [batch, heads, seq, head_dim]
        let q = self.split_heads(q);
        let k = self.split_heads(k);
        let v = self.split_heads(v);

        let scale = (self.head_dim as f64).powf(-0.5);
        let scores = q.matmul(k.swap_dims(2, 3)) * scale;

        let scores = match mask {
            Some(m) => {
                let keep = m.unsqueeze_dim::<4>(1).repeat_dim(1, self.num_heads);
                scores.mask_fill(keep.bool_not(), MASKED_SCORE)
            }
            None => scores,
        };

        let attn = softmax(scores, 3);
        let out = attn.matmul(v);

        let out = out
            .swap_dims(1, 2)
            .reshape([batch, seq_len, self.num_heads * self.head_dim]);
        self.proj.forward(out)
    }

    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, seq_len, _] = x.dims();
        x.reshape([batch, seq_len, self.num_heads, self.head_dim])
            .swap_dims(1, 2)
    }
}

/// Builds the self-attention mask for right-padded sequences
///
/// Entry `[b, i, j]` is `true` when key position `j` holds a real residue of
/// sample `b` (`j < lengths[b]`). Every row of a sample shares the same
/// column pattern.
pub fn padding_mask<B: Backend>(
    lengths: &[usize],
    seq_len: usize,
    device: &B::Device,
) -> Tensor<B, 3, Bool> {
    let batch = lengths.len();
    let mut data = Vec::with_capacity(batch * seq_len * seq_len);
    for &len in lengths {
        for _row in 0..seq_len {
            data.extend((0..seq_len).map(|col| col < len));
        }
    }
    Tensor::from_data(TensorData::new(data, [batch, seq_len, seq_len]), device)
}
