//! Integration tests for the forward pass with random weights.

use candle_core::Device;
use nano_gptj::model::GptJModel;
use nano_gptj::{Hyperparams, ScratchArena, WeightType};

fn hparams() -> Hyperparams {
    Hyperparams {
        n_vocab: 17,
        n_ctx: 24,
        n_embd: 16,
        n_head: 4,
        n_layer: 3,
        n_rot: 4,
        wtype: WeightType::F32,
    }
}

#[test]
fn test_logits_cover_vocabulary() {
    let device = Device::Cpu;
    let mut model = GptJModel::new_random(hparams(), &device).unwrap();
    let mut scratch = ScratchArena::new();

    let logits = model.evaluate(0, &[1, 2, 3, 4, 5], &mut scratch).unwrap();
    assert_eq!(logits.len(), 17);
    assert!(logits.iter().all(|l| l.is_finite()));
}

#[test]
fn test_batched_prefill_matches_stepped_decode() {
    let device = Device::Cpu;
    let mut model = GptJModel::new_random(hparams(), &device).unwrap();
    let mut scratch = ScratchArena::new();

    let prompt = [5u32, 9, 2, 14, 7, 1];
    let batched = model.evaluate(0, &prompt, &mut scratch).unwrap();

    let mut stepped = Vec::new();
    for (pos, &id) in prompt.iter().enumerate() {
        stepped = model.evaluate(pos, &[id], &mut scratch).unwrap();
    }

    for (a, b) in batched.iter().zip(&stepped) {
        assert!((a - b).abs() < 1e-3, "batched {a} vs stepped {b}");
    }
}

#[test]
fn test_chunked_prefill_matches_full_prefill() {
    let device = Device::Cpu;
    let mut model = GptJModel::new_random(hparams(), &device).unwrap();
    let mut scratch = ScratchArena::new();

    let prompt = [3u32, 11, 6, 0, 8, 15, 2];
    let full = model.evaluate(0, &prompt, &mut scratch).unwrap();

    let mut chunked = Vec::new();
    let mut n_past = 0;
    for chunk in prompt.chunks(3) {
        chunked = model.evaluate(n_past, chunk, &mut scratch).unwrap();
        n_past += chunk.len();
    }

    for (a, b) in full.iter().zip(&chunked) {
        assert!((a - b).abs() < 1e-3, "full {a} vs chunked {b}");
    }
}

#[test]
fn test_next_logits_depend_on_history() {
    let device = Device::Cpu;
    let mut scratch = ScratchArena::new();

    // same final token, different prefixes, same positions
    let mut model = GptJModel::new_random(hparams(), &device).unwrap();
    model.evaluate(0, &[1, 2, 3], &mut scratch).unwrap();
    let a = model.evaluate(3, &[4], &mut scratch).unwrap();

    model.evaluate(0, &[6, 7, 8], &mut scratch).unwrap();
    let b = model.evaluate(3, &[4], &mut scratch).unwrap();

    let diff: f32 = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).sum();
    assert!(diff > 1e-4, "history had no effect on logits");
}
