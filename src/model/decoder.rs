//! One transformer layer.
//!
//! The attention and feed-forward branches both read the same
//! pre-attention LayerNorm output and their results are summed with
//! the layer input (parallel-branch residual).

use candle_core::Tensor;

use crate::error::Result;
use crate::model::attention::CausalSelfAttention;
use crate::model::kv_cache::LayerKvCache;
use crate::model::mlp::Mlp;
use crate::model::norm::LayerNorm;

/// Transformer decoder layer with parallel attention and feed-forward.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    ln_1: LayerNorm,
    attn: CausalSelfAttention,
    mlp: Mlp,
}

impl DecoderLayer {
    pub fn new(ln_1: LayerNorm, attn: CausalSelfAttention, mlp: Mlp) -> Self {
        Self { ln_1, attn, mlp }
    }

    /// Creates a layer with random weights for testing.
    pub fn new_random(
        n_embd: usize,
        n_head: usize,
        n_rot: usize,
        n_ctx: usize,
        device: &candle_core::Device,
    ) -> Result<Self> {
        let ln_1 = LayerNorm::new_identity(n_embd, 1e-5, candle_core::DType::F32, device)?;
        let attn = CausalSelfAttention::new_random(n_embd, n_head, n_rot, n_ctx, device)?;
        let mlp = Mlp::new_random(n_embd, 4 * n_embd, device)?;
        Ok(Self::new(ln_1, attn, mlp))
    }

    /// Forward pass: `attn(ln(x)) + mlp(ln(x)) + x`.
    pub fn forward(&self, x: &Tensor, cache: &LayerKvCache, n_past: usize) -> Result<Tensor> {
        let normed = self.ln_1.forward(x)?;
        let attn_out = self.attn.forward(&normed, cache, n_past)?;
        let ff_out = self.mlp.forward(&normed)?;
        Ok(attn_out.add(&ff_out)?.add(x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::kv_cache::KvCache;
    use candle_core::Device;

    #[test]
    fn test_decoder_forward_shape() {
        let device = Device::Cpu;
        let layer = DecoderLayer::new_random(8, 2, 4, 16, &device).unwrap();
        let cache = KvCache::new(1, 16, 8, &device).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, (3, 8), &device).unwrap();
        let out = layer.forward(&x, cache.layer(0), 0).unwrap();

        assert_eq!(out.dims(), &[3, 8]);
    }

    #[test]
    fn test_residual_keeps_input_signal() {
        let device = Device::Cpu;
        let layer = DecoderLayer::new_random(8, 2, 4, 16, &device).unwrap();
        let cache = KvCache::new(1, 16, 8, &device).unwrap();

        // with small random weights, output stays near the input
        let x = Tensor::new(&[[100.0f32; 8]], &device).unwrap();
        let out: Vec<f32> = layer
            .forward(&x, cache.layer(0), 0)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        for v in out {
            assert!((v - 100.0).abs() < 50.0);
        }
    }
}
