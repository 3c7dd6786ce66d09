//! Token sampling.
//!
//! Sampling runs in two steps:
//!
//! 1. [`shortlist`] builds the candidate distribution: temperature
//!    scaling, descending sort, top-k truncation, softmax, then top-p
//!    truncation with renormalization. This step is deterministic.
//! 2. [`Sampler::sample`] draws one token from the shortlist with the
//!    sampler's RNG.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::vocab::TokenId;

/// Token sampler with temperature, top-k, and top-p.
#[derive(Debug, Clone)]
pub struct Sampler {
    temperature: f32,
    top_k: usize,
    top_p: f32,
    rng: StdRng,
}

impl Sampler {
    /// Creates a sampler from the generation config. An unset seed is
    /// derived from the clock.
    pub fn new(config: &GenerationConfig) -> Self {
        let seed = config.seed.unwrap_or_else(clock_seed);
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draws the next token from a logits row.
    pub fn sample(&mut self, logits: &[f32]) -> Result<TokenId> {
        if logits.is_empty() {
            return Err(Error::Sampling("empty logits".into()));
        }

        // non-positive temperature degenerates to greedy decoding
        if self.temperature <= 0.0 {
            let candidates = shortlist(logits, 1, 1.0, 1.0);
            return Ok(candidates[0].0);
        }

        let candidates = shortlist(logits, self.top_k, self.top_p, self.temperature);
        let dist = WeightedIndex::new(candidates.iter().map(|&(_, p)| p))
            .map_err(|e| Error::Sampling(e.to_string()))?;
        let idx = dist.sample(&mut self.rng);
        Ok(candidates[idx].0)
    }
}

/// Builds the candidate distribution for one sampling step.
///
/// Returns `(token id, probability)` pairs in descending probability
/// order; the probabilities sum to one. Equal logits keep their id
/// order (the sort is stable). `top_k` is clamped to the vocabulary
/// size; `top_p >= 1.0` disables nucleus truncation.
pub fn shortlist(
    logits: &[f32],
    top_k: usize,
    top_p: f32,
    temperature: f32,
) -> Vec<(TokenId, f64)> {
    if logits.is_empty() {
        return Vec::new();
    }

    let scale = 1.0 / temperature as f64;
    let mut items: Vec<(TokenId, f64)> = logits
        .iter()
        .enumerate()
        .map(|(i, &l)| (i as TokenId, l as f64 * scale))
        .collect();
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    items.truncate(top_k.clamp(1, items.len()));

    // stable softmax over the kept scores
    let max_score = items[0].1;
    let mut sum = 0.0;
    for item in &mut items {
        item.1 = (item.1 - max_score).exp();
        sum += item.1;
    }
    for item in &mut items {
        item.1 /= sum;
    }

    if (top_p as f64) < 1.0 {
        let mut cumulative = 0.0;
        let mut keep = items.len();
        for (i, &(_, p)) in items.iter().enumerate() {
            cumulative += p;
            if cumulative >= top_p as f64 {
                keep = i + 1; // keep the token that crossed the threshold
                break;
            }
        }
        items.truncate(keep);
        let inv = 1.0 / cumulative;
        for item in &mut items {
            item.1 *= inv;
        }
    }

    items
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(top_k: usize, top_p: f32, temperature: f32, seed: u64) -> GenerationConfig {
        GenerationConfig {
            seed: Some(seed),
            top_k,
            top_p,
            temperature,
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_top_k_one_is_greedy() {
        let logits = [0.1f32, 0.2, 5.0, 0.3];
        let mut sampler = Sampler::new(&config(1, 1.0, 0.9, 42));

        for _ in 0..20 {
            assert_eq!(sampler.sample(&logits).unwrap(), 2);
        }
    }

    #[test]
    fn test_greedy_tie_takes_lowest_id() {
        let logits = [1.0f32, 5.0, 5.0, 0.0];
        let candidates = shortlist(&logits, 1, 1.0, 1.0);
        assert_eq!(candidates[0].0, 1);
    }

    #[test]
    fn test_top_p_one_keeps_top_k_candidates() {
        let logits = [0.1f32, 0.2, 0.3, 0.4, 0.5];
        let candidates = shortlist(&logits, 3, 1.0, 1.0);

        assert_eq!(candidates.len(), 3);
        let ids: Vec<u32> = candidates.iter().map(|&(id, _)| id).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[test]
    fn test_top_k_clamped_to_vocab() {
        let logits = [0.1f32, 0.2];
        let candidates = shortlist(&logits, 40, 1.0, 1.0);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_shortlist_probabilities_sum_to_one() {
        let logits: Vec<f32> = (0..100).map(|i| (i as f32 * 0.37).sin()).collect();

        for &(top_k, top_p) in &[(40usize, 0.9f32), (10, 0.5), (100, 1.0)] {
            let candidates = shortlist(&logits, top_k, top_p, 0.9);
            let total: f64 = candidates.iter().map(|&(_, p)| p).sum();
            assert!((total - 1.0).abs() < 1e-9, "sum {total}");
        }
    }

    #[test]
    fn test_top_p_truncates_inclusive() {
        // probs after softmax at temperature 1: dominated by one token
        let logits = [10.0f32, 0.0, 0.0, 0.0];
        let candidates = shortlist(&logits, 4, 0.5, 1.0);

        // the first token alone crosses 0.5 and is kept
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0, 0);
        assert!((candidates[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let logits: Vec<f32> = (0..50).map(|i| (i as f32 * 0.73).cos()).collect();

        let mut a = Sampler::new(&config(40, 0.9, 0.9, 1234));
        let mut b = Sampler::new(&config(40, 0.9, 0.9, 1234));

        let seq_a: Vec<u32> = (0..32).map(|_| a.sample(&logits).unwrap()).collect();
        let seq_b: Vec<u32> = (0..32).map(|_| b.sample(&logits).unwrap()).collect();

        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn test_zero_temperature_is_greedy() {
        let logits = [0.0f32, 3.0, 1.0];
        let mut sampler = Sampler::new(&config(40, 0.9, 0.0, 7));
        assert_eq!(sampler.sample(&logits).unwrap(), 1);
    }

    #[test]
    fn test_empty_logits_rejected() {
        let mut sampler = Sampler::new(&config(40, 0.9, 0.9, 7));
        assert!(sampler.sample(&[]).is_err());
    }
}
