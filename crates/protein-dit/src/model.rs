//! Timestep-conditioned diffusion transformer over residue features
//!
//! # Architecture
//!
//! ```text
//! h = x_embedder(x) + pos_embed
//! c = t_embedder(t)
//! h = blocks(h, c, mask)
//! mean, v = final_layer(h, c)
//! ```
//!
//! The output is the noise estimate `x - mean`, or `(x - mean) / σ(v)` with
//! `σ(v) = sigmoid(v) * (1 - 2ε) + ε` when the variance head is enabled. All
//! modulation layers and the mean head start at zero, so the untrained model
//! returns its input.

use burn::nn::Linear;
use burn::module::Param;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::Distribution;
use protein_dit_core::dit::{DiTBlock, DiTBlockConfig, FinalLayer, FinalLayerConfig};
use protein_dit_core::embedding::{sinusoidal_positions, TimestepEmbedder, TimestepEmbedderConfig};
use protein_dit_core::init::xavier_linear;
use protein_dit_samplers::Denoiser;
use tracing::info;

use crate::config::{ModelConfigError, ProteinDiTConfig};

/// Raw output heads of the denoiser
#[derive(Debug, Clone)]
pub struct DenoiserOutput<B: Backend> {
    /// Mean head [batch, seq_len, input_dim]
    pub mean: Tensor<B, 3>,
    /// Variance head mapped into [ε, 1 - ε], when enabled
    pub variance: Option<Tensor<B, 3>>,
}

/// Protein backbone denoiser
#[derive(Module, Debug)]
pub struct ProteinDiT<B: Backend> {
    /// Residue features -> model width
    pub x_embedder: Linear<B>,
    pub t_embedder: TimestepEmbedder<B>,
    /// Positional embedding [1, seq_len, d_model], frozen when fixed
    pub pos_embed: Param<Tensor<B, 3>>,
    pub blocks: Vec<DiTBlock<B>>,
    pub final_layer: FinalLayer<B>,
    /// Lower bound of the variance head output
    pub sigma_eps: f64,
}

impl ProteinDiTConfig {
    /// Validates the configuration and initialises the model
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ProteinDiT<B>, ModelConfigError> {
        self.validate()?;

        let pos_embed = if self.learned_pos_embed {
            let table = Tensor::random(
                [1, self.seq_len, self.d_model],
                Distribution::Normal(0.0, self.init_range),
                device,
            );
            Param::from_tensor(table)
        } else {
            let table = sinusoidal_positions(self.seq_len, self.d_model, device).unsqueeze_dim(0);
            Param::from_tensor(table).set_require_grad(false)
        };

        let blocks = (0..self.n_layers)
            .map(|_| {
                DiTBlockConfig::new(self.d_model, self.n_heads, self.mlp_ratio)
                    .with_head_dim(self.d_head)
                    .with_bias(self.qkv_bias, self.attn_proj_bias, self.mlp_bias)
                    .with_norm_eps(self.layer_norm_eps)
                    .init(device)
            })
            .collect();

        let model = ProteinDiT {
            x_embedder: xavier_linear(self.input_dim, self.d_model, true, device),
            t_embedder: TimestepEmbedderConfig::new(self.d_model, self.frequency_embedding_size)
                .with_max_period(self.max_period)
                .init(device),
            pos_embed,
            blocks,
            final_layer: FinalLayerConfig::new(self.d_model, self.input_dim, self.learn_sigma).init(device),
            sigma_eps: self.sigma_eps,
        };

        info!(
            name = %self.model_name(),
            params = self.num_params(),
            "initialised denoiser"
        );
        Ok(model)
    }
}

impl<B: Backend> ProteinDiT<B> {
    /// Runs the network and returns the raw heads
    ///
    /// # Arguments
    ///
    /// * `x` - Noisy features [batch, seq_len, input_dim]
    /// * `t` - Progress values [batch]
    /// * `mask` - Optional attention mask [batch, seq_len, seq_len]
    pub fn forward_heads(
        &self,
        x: Tensor<B, 3>,
        t: Tensor<B, 1>,
        mask: Option<Tensor<B, 3, Bool>>,
    ) -> DenoiserOutput<B> {
        let [batch, seq_len, _] = x.dims();
        let [_, max_len, d_model] = self.pos_embed.dims();
        assert!(
            seq_len <= max_len,
            "sequence length {seq_len} exceeds the positional table ({max_len})"
        );

        let pos = self
            .pos_embed
            .val()
            .slice([0..1, 0..seq_len, 0..d_model])
            .repeat_dim(0, batch);
        let mut h = self.x_embedder.forward(x) + pos;

        let cond = self.t_embedder.forward(t);
        for block in &self.blocks {
            h = block.forward(h, cond.clone(), mask.clone());
        }

        let (mean, variance) = self.final_layer.forward(h, cond);
        let eps = self.sigma_eps;
        DenoiserOutput {
            mean,
            variance: variance.map(|v| sigmoid(v) * (1.0 - 2.0 * eps) + eps),
        }
    }

    /// Noise estimate for `x` at progress values `t`
    pub fn forward(&self, x: Tensor<B, 3>, t: Tensor<B, 1>, mask: Option<Tensor<B, 3, Bool>>) -> Tensor<B, 3> {
        let DenoiserOutput { mean, variance } = self.forward_heads(x.clone(), t, mask);
        match variance {
            Some(variance) => (x - mean) / variance,
            None => x - mean,
        }
    }
}

/// Host progress values as a [batch] tensor
pub fn progress_tensor<B: Backend>(t: &[f64], device: &B::Device) -> Tensor<B, 1> {
    let data: Vec<f32> = t.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(data, [t.len()]), device)
}

impl<B: Backend> Denoiser<B> for ProteinDiT<B> {
    type Conditioning = Option<Tensor<B, 3, Bool>>;

    fn predict_noise(&self, x: Tensor<B, 3>, t: &[f64], mask: &Self::Conditioning) -> Tensor<B, 3> {
        let t = progress_tensor(t, &x.device());
        self.forward(x, t, mask.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protein_dit_core::attention::padding_mask;
    use protein_dit_samplers::randn;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray<f32>;

    fn to_vec(t: Tensor<TestBackend, 3>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = ProteinDiTConfig::tiny().init::<TestBackend>(&device).unwrap();

        let x = Tensor::zeros([2, 10, 12], &device);
        let t = progress_tensor::<TestBackend>(&[0.2, 0.9], &device);
        let mask = padding_mask::<TestBackend>(&[10, 6], 10, &device);

        let out = model.forward_heads(x.clone(), t.clone(), Some(mask));
        assert_eq!(out.mean.dims(), [2, 10, 12]);
        assert_eq!(out.variance.map(|v| v.dims()), Some([2, 10, 12]));
        assert_eq!(model.forward(x, t, None).dims(), [2, 10, 12]);
    }

    #[test]
    fn test_untrained_model_is_identity() {
        let device = Default::default();
        let config = ProteinDiTConfig {
            learn_sigma: false,
            ..ProteinDiTConfig::tiny()
        };
        let model = config.init::<TestBackend>(&device).unwrap();

        let x: Tensor<TestBackend, 3> = randn([2, 8, 12], &mut ChaCha8Rng::seed_from_u64(0), &device);
        let t = progress_tensor::<TestBackend>(&[0.3, 0.7], &device);
        let out = model.forward(x.clone(), t, None);

        assert_eq!(to_vec(out), to_vec(x));
    }

    #[test]
    fn test_variance_head_bounds() {
        let device = Default::default();
        let model = ProteinDiTConfig::tiny().init::<TestBackend>(&device).unwrap();

        let x: Tensor<TestBackend, 3> = randn([1, 8, 12], &mut ChaCha8Rng::seed_from_u64(1), &device);
        let t = progress_tensor::<TestBackend>(&[0.5], &device);
        let out = model.forward_heads(x.clone(), t.clone(), None);

        // zero mean head at init
        assert!(to_vec(out.mean).iter().all(|&v| v == 0.0));

        let variance = to_vec(out.variance.clone().unwrap());
        assert!(variance.iter().all(|&v| (1e-3..=1.0 - 1e-3).contains(&v)));

        // composed output divides by the variance head
        let composed = model.forward(x.clone(), t, None);
        let expected = x / out.variance.unwrap();
        for (a, b) in to_vec(composed).iter().zip(to_vec(expected)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_fixed_positions_use_sinusoidal_table() {
        let device = Default::default();
        let config = ProteinDiTConfig::tiny();
        let model = config.init::<TestBackend>(&device).unwrap();

        let expected: Vec<f32> = sinusoidal_positions::<TestBackend>(config.seq_len, config.d_model, &device)
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(to_vec(model.pos_embed.val()), expected);
    }

    #[test]
    fn test_learned_positions_are_random() {
        let device = Default::default();
        let config = ProteinDiTConfig {
            learned_pos_embed: true,
            ..ProteinDiTConfig::tiny()
        };
        let model = config.init::<TestBackend>(&device).unwrap();

        let values = to_vec(model.pos_embed.val());
        assert_eq!(values.len(), config.seq_len * config.d_model);
        assert!(values.iter().any(|&v| v != 0.0));
        assert!(values.iter().all(|&v| v.abs() < 0.2));
    }

    #[test]
    fn test_denoiser_matches_forward() {
        let device = Default::default();
        let model = ProteinDiTConfig::tiny().init::<TestBackend>(&device).unwrap();

        let x: Tensor<TestBackend, 3> = randn([2, 5, 12], &mut ChaCha8Rng::seed_from_u64(2), &device);
        let mask = Some(padding_mask::<TestBackend>(&[5, 3], 5, &device));

        let via_trait = model.predict_noise(x.clone(), &[0.4, 0.6], &mask);
        let direct = model.forward(x, progress_tensor(&[0.4, 0.6], &device), mask);
        assert_eq!(to_vec(via_trait), to_vec(direct));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let device = Default::default();
        let config = ProteinDiTConfig {
            d_head: 8,
            ..ProteinDiTConfig::tiny()
        };
        assert!(config.init::<TestBackend>(&device).is_err());
    }

    #[test]
    #[should_panic(expected = "exceeds the positional table")]
    fn test_sequence_longer_than_table_panics() {
        let device = Default::default();
        let model = ProteinDiTConfig::tiny().init::<TestBackend>(&device).unwrap();

        let x = Tensor::zeros([1, 17, 12], &device);
        model.forward(x, progress_tensor(&[0.5], &device), None);
    }
}
