//! Diffusion Transformer for Protein Backbones
//!
//! A DiT with adaLN-Zero conditioning that predicts the noise in flattened
//! backbone coordinates (N, CA, C, O × xyz per residue).
//!
//! # Architecture
//!
//! - Linear residue embedding plus a fixed or learned positional table
//! - Sinusoidal timestep embedding shared by every block
//! - Masked self-attention so padded residues are never attended to
//! - Optional variance head that rescales the noise estimate
//!
//! # Example
//!
//! ```ignore
//! use protein_dit::ProteinDiTConfig;
//! use protein_dit_samplers::{sample, NoiseSchedule, SampleInputs, SamplingConfig};
//!
//! let model = ProteinDiTConfig::default().init(&device)?;
//! let trajectory = sample(
//!     &NoiseSchedule::default(),
//!     &model,
//!     &Some(mask),
//!     [batch, seq_len, 12],
//!     SampleInputs::default(),
//!     &SamplingConfig::default(),
//!     &mut rng,
//!     &device,
//! )?;
//! ```

pub mod config;
pub mod features;
pub mod model;

pub use config::{ModelConfigError, ProteinDiTConfig};
pub use features::{
    center_on_ca, expand_atom_mask, flatten_atoms, restore_atom37, select_backbone,
    select_backbone_mask, unflatten_atoms, FeatureNormalization,
};
pub use model::{progress_tensor, DenoiserOutput, ProteinDiT};
