//! Feed-forward block.
//!
//! Two biased projections around a GELU: expand to the inner dimension,
//! activate, project back.

use candle_core::{Device, Module, Tensor};
use candle_nn::Linear;

use crate::error::Result;

/// fc_in + GELU + fc_out feed-forward network.
#[derive(Debug, Clone)]
pub struct Mlp {
    fc_in: Linear,
    fc_out: Linear,
}

impl Mlp {
    /// Builds the block from weight and bias tensors.
    ///
    /// `fc_in_weight` is `[n_ff, n_embd]`, `fc_out_weight` is
    /// `[n_embd, n_ff]`.
    pub fn new(
        fc_in_weight: Tensor,
        fc_in_bias: Tensor,
        fc_out_weight: Tensor,
        fc_out_bias: Tensor,
    ) -> Self {
        Self {
            fc_in: Linear::new(fc_in_weight, Some(fc_in_bias)),
            fc_out: Linear::new(fc_out_weight, Some(fc_out_bias)),
        }
    }

    /// Creates an Mlp with random weights for testing.
    pub fn new_random(n_embd: usize, n_ff: usize, device: &Device) -> Result<Self> {
        let scale = 0.02;
        let fc_in_weight = Tensor::randn(0.0f32, scale, (n_ff, n_embd), device)?;
        let fc_in_bias = Tensor::zeros(n_ff, candle_core::DType::F32, device)?;
        let fc_out_weight = Tensor::randn(0.0f32, scale, (n_embd, n_ff), device)?;
        let fc_out_bias = Tensor::zeros(n_embd, candle_core::DType::F32, device)?;
        Ok(Self::new(fc_in_weight, fc_in_bias, fc_out_weight, fc_out_bias))
    }

    /// Forward pass: `fc_out(gelu(fc_in(x)))`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.fc_in.forward(x)?.gelu()?;
        Ok(self.fc_out.forward(&hidden)?)
    }
}
