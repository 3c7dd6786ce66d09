//! Causal self-attention with a persistent KV cache.
//!
//! Queries and keys get rotary position embeddings before the fresh
//! key/value rows are written to the cache, so cached keys are already
//! rotated. Attention then runs against every cached position up to
//! `n_past + n`, with a causal mask keeping queries from seeing later
//! positions.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::ops::softmax_last_dim;
use candle_nn::Linear;

use crate::error::Result;
use crate::model::kv_cache::LayerKvCache;
use crate::model::rope::RotaryEmbedding;

/// Multi-head causal self-attention.
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    /// Output projection, no bias.
    out_proj: Linear,
    rope: RotaryEmbedding,
    n_head: usize,
    head_dim: usize,
}

impl CausalSelfAttention {
    /// Builds attention from projection weight tensors, each shaped
    /// `[n_embd, n_embd]`.
    pub fn new(
        q_weight: Tensor,
        k_weight: Tensor,
        v_weight: Tensor,
        out_weight: Tensor,
        rope: RotaryEmbedding,
        n_head: usize,
        n_embd: usize,
    ) -> Self {
        Self {
            q_proj: Linear::new(q_weight, None),
            k_proj: Linear::new(k_weight, None),
            v_proj: Linear::new(v_weight, None),
            out_proj: Linear::new(out_weight, None),
            rope,
            n_head,
            head_dim: n_embd / n_head,
        }
    }

    /// Creates attention with random weights for testing.
    pub fn new_random(
        n_embd: usize,
        n_head: usize,
        n_rot: usize,
        n_ctx: usize,
        device: &Device,
    ) -> Result<Self> {
        let scale = 0.02;
        let w = || Tensor::randn(0.0f32, scale, (n_embd, n_embd), device);
        let rope = RotaryEmbedding::new(n_rot, n_ctx, 10000.0, device)?;
        Ok(Self::new(w()?, w()?, w()?, w()?, rope, n_head, n_embd))
    }

    /// Attention over `x` at absolute positions `n_past ..`.
    ///
    /// # Arguments
    ///
    /// * `x` - Normalized hidden states [n, n_embd]
    /// * `cache` - This layer's KV cache; rows for the new positions
    ///   are written before attention reads the prefix back
    /// * `n_past` - Number of positions already in the cache
    pub fn forward(&self, x: &Tensor, cache: &LayerKvCache, n_past: usize) -> Result<Tensor> {
        let (n, n_embd) = x.dims2()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((n, self.n_head, self.head_dim))?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((n, self.n_head, self.head_dim))?;
        let v = self.v_proj.forward(x)?;

        let q = self.rope.apply(&q, n_past)?;
        let k = self.rope.apply(&k, n_past)?;

        cache.write(n_past, &k.reshape((n, n_embd))?, &v)?;

        let total = n_past + n;
        let keys = cache
            .keys(total)?
            .reshape((total, self.n_head, self.head_dim))?
            .transpose(0, 1)?; // [n_head, total, head_dim]
        let values = cache
            .values(total)?
            .reshape((total, self.n_head, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()?;

        let q = q.transpose(0, 1)?.contiguous()?; // [n_head, n, head_dim]

        // scores: [n_head, n, total]
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&keys.transpose(1, 2)?.contiguous()?)? * scale)?;
        let scores = if n > 1 {
            let mask = causal_mask(n, total, n_past, x.device())?;
            scores.broadcast_add(&mask)?
        } else {
            scores
        };
        let weights = softmax_last_dim(&scores)?;

        // merge heads: [n_head, n, head_dim] -> [n, n_embd]
        let out = weights
            .matmul(&values)?
            .transpose(0, 1)?
            .contiguous()?
            .reshape((n, n_embd))?;

        Ok(self.out_proj.forward(&out)?)
    }
}

/// Mask of shape [1, n, total]: query at position `n_past + i` may not
/// attend past itself.
fn causal_mask(n: usize, total: usize, n_past: usize, device: &Device) -> Result<Tensor> {
    let mut mask = vec![0.0f32; n * total];
    for i in 0..n {
        for (j, m) in mask[i * total..(i + 1) * total].iter_mut().enumerate() {
            if j > n_past + i {
                *m = f32::NEG_INFINITY;
            }
        }
    }
    Ok(Tensor::from_vec(mask, (1, n, total), device)?.to_dtype(DType::F32)?)
}
