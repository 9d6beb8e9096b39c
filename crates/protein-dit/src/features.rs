//! Backbone feature helpers
//!
//! Structures arrive in the 37-slot atom layout. The model sees only the
//! backbone atoms N, CA, C and O, flattened to 12 features per residue.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Atom slots in the full per-residue layout
pub const NUM_ATOM_SLOTS: usize = 37;
/// Positions of N, CA, C, O in the full layout
pub const BACKBONE_SLOTS: [usize; 4] = [0, 1, 2, 4];
/// Backbone atoms kept per residue
pub const NUM_BACKBONE_ATOMS: usize = BACKBONE_SLOTS.len();
/// Features per residue after flattening
pub const FEATURES_PER_RESIDUE: usize = NUM_BACKBONE_ATOMS * 3;

/// Index of CA within the backbone layout
const CA: usize = 1;

fn backbone_indices<B: Backend>(device: &B::Device) -> Tensor<B, 1, Int> {
    let indices: Vec<i64> = BACKBONE_SLOTS.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(indices, [NUM_BACKBONE_ATOMS]), device)
}

/// Keeps the backbone slots: [b, s, 37, 3] -> [b, s, 4, 3]
pub fn select_backbone<B: Backend>(atom37: Tensor<B, 4>) -> Tensor<B, 4> {
    let indices = backbone_indices(&atom37.device());
    atom37.select(2, indices)
}

/// Keeps the backbone slots of an atom mask: [b, s, 37] -> [b, s, 4]
pub fn select_backbone_mask<B: Backend>(mask37: Tensor<B, 3>) -> Tensor<B, 3> {
    let indices = backbone_indices(&mask37.device());
    mask37.select(2, indices)
}

/// Scatters backbone atoms back into the full layout, zero elsewhere:
/// [b, s, 4, 3] -> [b, s, 37, 3]
pub fn restore_atom37<B: Backend>(backbone: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, seq_len, _, coords] = backbone.dims();
    let device = backbone.device();

    // N, CA, C | CB | O | side chain slots
    let n_ca_c = backbone.clone().slice([0..batch, 0..seq_len, 0..3, 0..coords]);
    let o = backbone.slice([0..batch, 0..seq_len, 3..4, 0..coords]);
    let cb = Tensor::zeros([batch, seq_len, 1, coords], &device);
    let rest = Tensor::zeros([batch, seq_len, NUM_ATOM_SLOTS - 5, coords], &device);

    Tensor::cat(vec![n_ca_c, cb, o, rest], 2)
}

/// [b, s, 4, 3] -> [b, s, 12]
pub fn flatten_atoms<B: Backend>(atoms: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, seq_len, n_atoms, coords] = atoms.dims();
    atoms.reshape([batch, seq_len, n_atoms * coords])
}

/// [b, s, 12] -> [b, s, 4, 3]
pub fn unflatten_atoms<B: Backend>(features: Tensor<B, 3>) -> Tensor<B, 4> {
    let [batch, seq_len, _] = features.dims();
    features.reshape([batch, seq_len, NUM_BACKBONE_ATOMS, 3])
}

/// Repeats a per-atom mask over the coordinates: [b, s, 4] -> [b, s, 12]
pub fn expand_atom_mask<B: Backend>(mask: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, seq_len, n_atoms] = mask.dims();
    mask.unsqueeze_dim::<4>(3)
        .repeat_dim(3, 3)
        .reshape([batch, seq_len, n_atoms * 3])
}

/// Translates every structure so its valid CA atoms are centred on the origin
///
/// `atoms` is [b, s, 4, 3] and `mask` [b, s, 4] with 1 for resolved atoms.
/// Unresolved atoms are zeroed.
pub fn center_on_ca<B: Backend>(atoms: Tensor<B, 4>, mask: Tensor<B, 3>) -> Tensor<B, 4> {
    let [batch, seq_len, n_atoms, coords] = atoms.dims();

    let ca = atoms.clone().slice([0..batch, 0..seq_len, CA..CA + 1, 0..coords]);
    let ca_valid = mask.clone().slice([0..batch, 0..seq_len, CA..CA + 1]).unsqueeze_dim::<4>(3);

    // [b, 1, 1, 3]
    let centroid = (ca * ca_valid.clone()).sum_dim(1) / (ca_valid.sum_dim(1) + 1e-9);
    let valid = mask.unsqueeze_dim::<4>(3);

    (atoms - centroid.repeat_dim(1, seq_len).repeat_dim(2, n_atoms)) * valid
}

/// Per-feature standardisation statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureNormalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Default for FeatureNormalization {
    fn default() -> Self {
        Self {
            mean: vec![0.0; FEATURES_PER_RESIDUE],
            std: vec![1.0; FEATURES_PER_RESIDUE],
        }
    }
}

impl FeatureNormalization {
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Self {
        assert_eq!(mean.len(), std.len(), "mean and std must have the same length");
        Self { mean, std }
    }

    /// `(x - mean) / std` over [b, s, features]
    pub fn normalize<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let (mean, std) = self.stats(&x);
        (x - mean) / std
    }

    /// `x * std + mean` over [b, s, features]
    pub fn denormalize<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let (mean, std) = self.stats(&x);
        x * std + mean
    }

    fn stats<B: Backend>(&self, x: &Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch, seq_len, features] = x.dims();
        assert_eq!(features, self.mean.len(), "feature width mismatch");

        let device = x.device();
        let expand = |values: &[f32]| {
            Tensor::<B, 3>::from_data(TensorData::new(values.to_vec(), [1, 1, features]), &device)
                .repeat_dim(0, batch)
                .repeat_dim(1, seq_len)
        };
        (expand(&self.mean), expand(&self.std))
    }
}
