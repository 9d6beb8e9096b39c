//! Denoiser configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelConfigError {
    #[error("d_model ({d_model}) must be divisible by n_heads ({n_heads})")]
    HeadDivisibility { d_model: usize, n_heads: usize },
    #[error("input_dim ({input_dim}) must be divisible by n_heads ({n_heads})")]
    FeatureDivisibility { input_dim: usize, n_heads: usize },
    #[error("n_heads * d_head ({n_heads} * {d_head}) must equal d_model ({d_model})")]
    HeadDimProduct {
        n_heads: usize,
        d_head: usize,
        d_model: usize,
    },
    #[error("fixed sinusoidal positions need an even d_model, got {0}")]
    OddPositionalWidth(usize),
    #[error("{0} must be non-zero")]
    ZeroSize(&'static str),
    #[error("sigma_eps must lie in [0, 0.5), got {0}")]
    InvalidSigmaEps(f64),
}

/// Protein DiT configuration
///
/// Defaults describe the 8-layer, 128-wide backbone denoiser over 4 backbone
/// atoms × 3 coordinates per residue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProteinDiTConfig {
    /// Features per residue
    pub input_dim: usize,
    /// Add the variance head and divide the output by it
    pub learn_sigma: bool,
    /// Model width
    pub d_model: usize,
    /// Layer norm epsilon inside the blocks
    pub layer_norm_eps: f64,
    /// Std of the learned positional embedding initialisation
    pub init_range: f64,
    /// Maximum number of residues
    pub seq_len: usize,
    /// Dimension per attention head
    pub d_head: usize,
    /// Number of attention heads
    pub n_heads: usize,
    /// Number of DiT blocks
    pub n_layers: usize,
    pub qkv_bias: bool,
    pub attn_proj_bias: bool,
    /// MLP expansion ratio
    pub mlp_ratio: usize,
    pub mlp_bias: bool,
    /// Width of the sinusoidal timestep embedding
    pub frequency_embedding_size: usize,
    /// Controls the minimum timestep frequency
    pub max_period: f64,
    /// Learned positional embedding instead of the fixed sinusoidal table
    pub learned_pos_embed: bool,
    /// Lower bound of the variance head output
    pub sigma_eps: f64,
}

impl Default for ProteinDiTConfig {
    fn default() -> Self {
        Self {
            input_dim: 12,
            learn_sigma: true,
            d_model: 128,
            layer_norm_eps: 1e-6,
            init_range: 0.02,
            seq_len: 256,
            d_head: 64,
            n_heads: 2,
            n_layers: 8,
            qkv_bias: true,
            attn_proj_bias: true,
            mlp_ratio: 4,
            mlp_bias: true,
            frequency_embedding_size: 256,
            max_period: 10000.0,
            learned_pos_embed: false,
            sigma_eps: 1e-3,
        }
    }
}

impl ProteinDiTConfig {
    /// Tiny model for testing
    pub fn tiny() -> Self {
        Self {
            d_model: 32,
            seq_len: 16,
            d_head: 16,
            n_heads: 2,
            n_layers: 2,
            frequency_embedding_size: 32,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ModelConfigError> {
        let sizes = [
            ("input_dim", self.input_dim),
            ("d_model", self.d_model),
            ("seq_len", self.seq_len),
            ("d_head", self.d_head),
            ("n_heads", self.n_heads),
            ("n_layers", self.n_layers),
            ("mlp_ratio", self.mlp_ratio),
            ("frequency_embedding_size", self.frequency_embedding_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(ModelConfigError::ZeroSize(name));
        }

        if self.d_model % self.n_heads != 0 {
            return Err(ModelConfigError::HeadDivisibility {
                d_model: self.d_model,
                n_heads: self.n_heads,
            });
        }
        if self.input_dim % self.n_heads != 0 {
            return Err(ModelConfigError::FeatureDivisibility {
                input_dim: self.input_dim,
                n_heads: self.n_heads,
            });
        }
        if self.n_heads * self.d_head != self.d_model {
            return Err(ModelConfigError::HeadDimProduct {
                n_heads: self.n_heads,
                d_head: self.d_head,
                d_model: self.d_model,
            });
        }
        if !self.learned_pos_embed && self.d_model % 2 == 1 {
            return Err(ModelConfigError::OddPositionalWidth(self.d_model));
        }
        if !(0.0..0.5).contains(&self.sigma_eps) {
            return Err(ModelConfigError::InvalidSigmaEps(self.sigma_eps));
        }
        Ok(())
    }

    /// Run name used for checkpoint directories
    pub fn model_name(&self) -> String {
        let mut name = format!(
            "DiT-n_layers={}-d_model={}-d_heads={}-learn_sigma={}",
            self.n_layers,
            self.d_model,
            self.n_heads,
            if self.learn_sigma { "True" } else { "False" }
        );
        if self.learned_pos_embed {
            name.push_str("-learned_pos_embed=True");
        }
        name
    }

    /// Total parameter count, positional embedding included
    pub fn num_params(&self) -> usize {
        let linear = |d_in: usize, d_out: usize, bias: bool| d_in * d_out + if bias { d_out } else { 0 };
        let d = self.d_model;
        let hidden = d * self.mlp_ratio;

        let x_embedder = linear(self.input_dim, d, true);
        let t_embedder = linear(self.frequency_embedding_size, d, true) + linear(d, d, true);
        let pos_embed = self.seq_len * d;

        let block = linear(d, 3 * d, self.qkv_bias)
            + linear(d, d, self.attn_proj_bias)
            + linear(d, hidden, self.mlp_bias)
            + linear(hidden, d, self.mlp_bias)
            + linear(d, 6 * d, true);

        let heads = if self.learn_sigma { 2 } else { 1 };
        let final_layer = linear(d, 2 * d, true) + heads * linear(d, self.input_dim, true);

        x_embedder + t_embedder + pos_embed + self.n_layers * block + final_layer
    }
}
