//! Persistent key/value cache.
//!
//! Each layer owns one key buffer and one value buffer covering the
//! full context window, shaped `[n_ctx, n_embd]` and stored in f16.
//! Rows are written in place as positions are evaluated; attention
//! reads back the prefix covering the positions computed so far.

use candle_core::{DType, Device, Tensor};

use crate::error::Result;

/// KV cache for a single transformer layer.
#[derive(Debug)]
pub struct LayerKvCache {
    /// Key rows (rotary applied): [n_ctx, n_embd].
    keys: Tensor,
    /// Value rows: [n_ctx, n_embd].
    values: Tensor,
}

impl LayerKvCache {
    fn new(n_ctx: usize, n_embd: usize, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            keys: Tensor::zeros((n_ctx, n_embd), dtype, device)?,
            values: Tensor::zeros((n_ctx, n_embd), dtype, device)?,
        })
    }

    /// Writes key/value rows for positions `pos .. pos + n`.
    ///
    /// `keys` and `values` are `[n, n_embd]` f32 tensors; they are
    /// converted to the cache dtype in place.
    pub fn write(&self, pos: usize, keys: &Tensor, values: &Tensor) -> Result<()> {
        self.keys.slice_set(&keys.to_dtype(self.keys.dtype())?, 0, pos)?;
        self.values
            .slice_set(&values.to_dtype(self.values.dtype())?, 0, pos)?;
        Ok(())
    }

    /// Key rows for positions `0 .. len`, widened to f32.
    pub fn keys(&self, len: usize) -> Result<Tensor> {
        Ok(self.keys.narrow(0, 0, len)?.to_dtype(DType::F32)?)
    }

    /// Value rows for positions `0 .. len`, widened to f32.
    pub fn values(&self, len: usize) -> Result<Tensor> {
        Ok(self.values.narrow(0, 0, len)?.to_dtype(DType::F32)?)
    }
}

/// Full KV cache for all transformer layers.
#[derive(Debug)]
pub struct KvCache {
    layers: Vec<LayerKvCache>,
    n_ctx: usize,
    n_embd: usize,
}

impl KvCache {
    /// Allocates f16 buffers for all layers.
    pub fn new(n_layer: usize, n_ctx: usize, n_embd: usize, device: &Device) -> Result<Self> {
        let mut layers = Vec::with_capacity(n_layer);
        for _ in 0..n_layer {
            layers.push(LayerKvCache::new(n_ctx, n_embd, DType::F16, device)?);
        }
        Ok(Self {
            layers,
            n_ctx,
            n_embd,
        })
    }

    /// Cache for one layer.
    pub fn layer(&self, idx: usize) -> &LayerKvCache {
        &self.layers[idx]
    }

    /// Context window length covered by the cache.
    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    /// Memory held by the cache, in bytes.
    pub fn size_in_bytes(&self) -> usize {
        // K and V, two bytes per element
        self.layers.len() * 2 * self.n_ctx * self.n_embd * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_shapes_and_size() {
        let device = Device::Cpu;
        let cache = KvCache::new(2, 8, 4, &device).unwrap();

        assert_eq!(cache.n_ctx(), 8);
        assert_eq!(cache.layer(0).keys(8).unwrap().dims(), &[8, 4]);
        // 2 layers * 2 buffers * 8 * 4 * 2 bytes
        assert_eq!(cache.size_in_bytes(), 256);
    }

    #[test]
    fn test_write_then_read_back() {
        let device = Device::Cpu;
        let cache = KvCache::new(1, 4, 2, &device).unwrap();

        let k = Tensor::new(&[[1.0f32, 2.0], [3.0, 4.0]], &device).unwrap();
        let v = Tensor::new(&[[5.0f32, 6.0], [7.0, 8.0]], &device).unwrap();
        cache.layer(0).write(1, &k, &v).unwrap();

        let keys: Vec<f32> = cache
            .layer(0)
            .keys(3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(keys, vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);

        let values: Vec<f32> = cache
            .layer(0)
            .values(3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(values, vec![0.0, 0.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_overwrite_rows() {
        let device = Device::Cpu;
        let cache = KvCache::new(1, 4, 2, &device).unwrap();

        let a = Tensor::new(&[[1.0f32, 1.0]], &device).unwrap();
        let b = Tensor::new(&[[2.0f32, 2.0]], &device).unwrap();
        cache.layer(0).write(0, &a, &a).unwrap();
        cache.layer(0).write(0, &b, &b).unwrap();

        let keys: Vec<f32> = cache
            .layer(0)
            .keys(1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(keys, vec![2.0, 2.0]);
    }
}
