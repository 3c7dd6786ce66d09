//! Layer Normalization.
//!
//! Classic LayerNorm: center by the mean, scale by the standard
//! deviation, then apply the learned affine transform.
//!
//! Reference: <https://arxiv.org/abs/1607.06450>

use candle_core::{DType, Device, Result, Tensor, D};

/// Layer normalization with learned scale and bias.
///
/// Formula: `output = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias`
/// with statistics taken over the last dimension.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Learnable scale parameter [hidden_size].
    weight: Tensor,
    /// Learnable shift parameter [hidden_size].
    bias: Tensor,
    /// Small constant for numerical stability.
    eps: f64,
}

impl LayerNorm {
    /// Creates a new LayerNorm from weight and bias tensors.
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    /// Creates a LayerNorm with unit scale and zero shift, for tests.
    pub fn new_identity(
        hidden_size: usize,
        eps: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let weight = Tensor::ones(hidden_size, dtype, device)?;
        let bias = Tensor::zeros(hidden_size, dtype, device)?;
        Ok(Self { weight, bias, eps })
    }

    /// Returns the epsilon value.
    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Applies layer normalization over the last dimension.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normalized = centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}
