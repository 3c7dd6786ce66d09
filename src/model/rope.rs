//! Rotary Position Embeddings, interleaved-pair style.
//!
//! Consecutive element pairs `(x[2i], x[2i+1])` of each head vector are
//! rotated by a position-dependent angle. Only the first `n_rot`
//! dimensions of the head participate; the remainder passes through
//! unchanged.
//!
//! Reference: <https://arxiv.org/abs/2104.09864>

use candle_core::{Device, Result, Tensor};

/// Rotary embedding with precomputed cos/sin tables.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    /// Precomputed cosine values [max_seq_len, n_rot / 2].
    cos_cache: Tensor,
    /// Precomputed sine values [max_seq_len, n_rot / 2].
    sin_cache: Tensor,
    /// Rotated dimensions per head (even).
    n_rot: usize,
}

impl RotaryEmbedding {
    /// Precomputes rotation tables for positions `0..max_seq_len`.
    ///
    /// `n_rot` must be even; pair `i` rotates with frequency
    /// `theta^(-2i / n_rot)`.
    pub fn new(n_rot: usize, max_seq_len: usize, theta: f64, device: &Device) -> Result<Self> {
        assert!(n_rot % 2 == 0, "rotary dimension must be even");

        let half = n_rot / 2;
        let inv_freq: Vec<f32> = (0..half)
            .map(|i| (1.0 / theta.powf(2.0 * i as f64 / n_rot as f64)) as f32)
            .collect();
        let inv_freq = Tensor::new(inv_freq.as_slice(), device)?; // [half]

        let positions: Vec<f32> = (0..max_seq_len).map(|p| p as f32).collect();
        let positions = Tensor::new(positions.as_slice(), device)?.reshape((max_seq_len, 1))?;

        // angles: [max_seq_len, half]
        let angles = positions.broadcast_mul(&inv_freq)?;
        let cos_cache = angles.cos()?;
        let sin_cache = angles.sin()?;

        Ok(Self {
            cos_cache,
            sin_cache,
            n_rot,
        })
    }

    /// Returns the number of rotated dimensions.
    pub fn n_rot(&self) -> usize {
        self.n_rot
    }

    /// Rotates the first `n_rot` dimensions of every head vector.
    ///
    /// # Arguments
    ///
    /// * `x` - Tensor of shape [seq_len, n_head, head_dim]
    /// * `start_pos` - Absolute position of the first token in `x`
    pub fn apply(&self, x: &Tensor, start_pos: usize) -> Result<Tensor> {
        let (seq_len, n_head, head_dim) = x.dims3()?;
        let half = self.n_rot / 2;

        let x_rot = x.narrow(2, 0, self.n_rot)?.contiguous()?;

        // view pairs: [seq_len, n_head, half, 2]
        let pairs = x_rot.reshape((seq_len, n_head, half, 2))?;
        let even = pairs.narrow(3, 0, 1)?;
        let odd = pairs.narrow(3, 1, 1)?;

        // tables for these positions, shaped for broadcast:
        // [seq_len, 1, half, 1]
        let cos = self
            .cos_cache
            .narrow(0, start_pos, seq_len)?
            .reshape((seq_len, 1, half, 1))?;
        let sin = self
            .sin_cache
            .narrow(0, start_pos, seq_len)?
            .reshape((seq_len, 1, half, 1))?;

        let rot_even = (even.broadcast_mul(&cos)? - odd.broadcast_mul(&sin)?)?;
        let rot_odd = (even.broadcast_mul(&sin)? + odd.broadcast_mul(&cos)?)?;

        // re-interleave: [seq_len, n_head, half, 2] -> [seq_len, n_head, n_rot]
        let rotated = Tensor::cat(&[&rot_even, &rot_odd], 3)?.reshape((seq_len, n_head, self.n_rot))?;

        if self.n_rot == head_dim {
            Ok(rotated)
        } else {
            let pass = x.narrow(2, self.n_rot, head_dim - self.n_rot)?;
            Tensor::cat(&[&rotated, &pass], 2)
        }
    }
}
