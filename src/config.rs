//! Configuration types for nano-gptj.

use serde::{Deserialize, Serialize};

/// Parameters for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// RNG seed for sampling. `None` derives a seed from the clock.
    pub seed: Option<u64>,
    /// Worker-thread hint for the tensor backend.
    pub n_threads: usize,
    /// Maximum number of tokens to generate.
    pub n_predict: usize,
    /// Top-k sampling: keep only the k most likely tokens.
    pub top_k: usize,
    /// Top-p (nucleus) sampling: keep tokens covering p probability mass.
    pub top_p: f32,
    /// Temperature for scaling logits before sampling.
    pub temperature: f32,
    /// Number of prompt tokens to evaluate per forward pass.
    pub n_batch: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            n_threads: default_n_threads(),
            n_predict: 200,
            top_k: 40,
            top_p: 0.9,
            temperature: 0.9,
            n_batch: 8,
        }
    }
}

fn default_n_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenerationConfig::default();

        assert_eq!(config.n_predict, 200);
        assert_eq!(config.top_k, 40);
        assert_eq!(config.top_p, 0.9);
        assert_eq!(config.temperature, 0.9);
        assert_eq!(config.n_batch, 8);
        assert!(config.seed.is_none());
        assert!(config.n_threads >= 1 && config.n_threads <= 4);
    }
}
