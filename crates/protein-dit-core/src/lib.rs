//! Core Building Blocks for Protein Backbone Denoisers
//!
//! Shared transformer components used by the timestep-conditioned DiT in
//! `protein-dit`.
//!
//! # Modules
//!
//! ## Attention
//!
//! - [`attention`] - Masked multi-head self-attention and padding masks
//!
//! ## Normalization
//!
//! - [`layernorm`] - Non-affine layer normalization
//!
//! ## Embeddings
//!
//! - [`embedding`] - Sinusoidal timestep embedder and fixed positional table
//!
//! ## Feed-Forward Networks
//!
//! - [`mlp`] - Two-layer MLP with tanh-approximated GELU
//!
//! ## Model Components
//!
//! - [`dit`] - adaLN-Zero DiT block and final layer
//! - [`init`] - Linear layer constructors with the initialisations the DiT expects
//!
//! # Example
//!
//! ```ignore
//! use protein_dit_core::dit::DiTBlockConfig;
//!
//! let block = DiTBlockConfig::new(128, 2, 4).init(&device);
//! let y = block.forward(x, cond, Some(mask));
//! ```

pub mod attention;
pub mod dit;
pub mod embedding;
pub mod init;
pub mod layernorm;
pub mod mlp;
