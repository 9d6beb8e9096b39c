//! Layer normalization without a learned affine transform
//!
//! The adaLN-Zero blocks supply their own scale and shift from the
//! conditioning vector, so the normalization itself carries no parameters.

use burn::prelude::*;

/// Normalizes `x` across its last dimension
///
/// # Formula
///
/// ```text
/// y = (x - mean(x)) / sqrt(var(x) + eps)
/// ```
///
/// The variance is the biased (population) estimate.
pub fn layer_norm<B: Backend, const D: usize>(x: Tensor<B, D>, eps: f64) -> Tensor<B, D> {
    let last_dim = D - 1;
    let mean = x.clone().mean_dim(last_dim);
    let var = x.clone().var_bias(last_dim);
    (x - mean) / (var + eps).sqrt()
}
