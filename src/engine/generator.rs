//! Generation driver.
//!
//! Drives a loaded model through one generation run: a warm-up pass to
//! establish the scratch budget, prompt prefill in batches, then the
//! sample/emit/evaluate decode loop. The driver is generic over
//! [`Evaluate`] so the loop can be exercised without real weights.

use std::path::Path;

use candle_core::Device;
use log::{debug, info};

use crate::config::GenerationConfig;
use crate::engine::sampler::Sampler;
use crate::error::{Error, Result};
use crate::model::{GptJModel, ModelFile, ScratchArena};
use crate::vocab::{TokenId, Vocabulary};

/// Token ids fed to the warm-up pass that sizes the scratch budget.
const WARMUP_TOKENS: [TokenId; 4] = [0, 1, 2, 3];

/// Forward-pass seam the driver runs against.
pub trait Evaluate {
    /// Evaluates `tokens` at absolute positions `n_past ..`, returning
    /// the logits of the last token.
    fn evaluate(
        &mut self,
        n_past: usize,
        tokens: &[TokenId],
        scratch: &mut ScratchArena,
    ) -> Result<Vec<f32>>;

    /// Context window length in tokens.
    fn n_ctx(&self) -> usize;
}

impl Evaluate for GptJModel {
    fn evaluate(
        &mut self,
        n_past: usize,
        tokens: &[TokenId],
        scratch: &mut ScratchArena,
    ) -> Result<Vec<f32>> {
        GptJModel::evaluate(self, n_past, tokens, scratch)
    }

    fn n_ctx(&self) -> usize {
        GptJModel::n_ctx(self)
    }
}

/// Runs one generation pass over an already tokenized prompt.
///
/// `on_token` receives the decoded text of every sampled token,
/// including the end-of-text token that terminates the run; returning
/// `false` stops generation. Returns the number of sampled tokens.
pub fn run_generation<E, F>(
    model: &mut E,
    vocab: &Vocabulary,
    prompt: &[TokenId],
    config: &GenerationConfig,
    scratch: &mut ScratchArena,
    mut on_token: F,
) -> Result<usize>
where
    E: Evaluate,
    F: FnMut(&str) -> bool,
{
    if prompt.is_empty() {
        return Err(Error::EmptyPrompt);
    }
    let n_ctx = model.n_ctx();
    if prompt.len() >= n_ctx {
        return Err(Error::PromptTooLong {
            prompt: prompt.len(),
            n_ctx,
        });
    }

    let max_new = config.n_predict.min(n_ctx - prompt.len());
    debug!(
        "run: {} prompt tokens, up to {} new, {} backend threads",
        prompt.len(),
        max_new,
        config.n_threads
    );

    // warm-up pass sizes the scratch budget before real work
    model.evaluate(0, &WARMUP_TOKENS, scratch)?;

    let mut sampler = Sampler::new(config);
    let eot = vocab.end_of_text_id();

    // prefill: evaluate the prompt in batches, never sampling
    let n_batch = config.n_batch.max(1);
    let mut n_past = 0;
    let mut logits = Vec::new();
    for chunk in prompt.chunks(n_batch) {
        logits = model.evaluate(n_past, chunk, scratch)?;
        n_past += chunk.len();
    }

    // decode: the first token comes from the prefill logits
    let mut generated = 0;
    while generated < max_new {
        let id = sampler.sample(&logits)?;
        generated += 1;

        let piece = vocab.decode(id).unwrap_or_default();
        if !on_token(piece) {
            break;
        }
        if id == eot {
            break;
        }
        if generated == max_new {
            break;
        }

        logits = model.evaluate(n_past, &[id], scratch)?;
        n_past += 1;
    }

    Ok(generated)
}

/// A loaded model with its vocabulary and scratch memory.
///
/// One context runs one generation at a time; `generate` takes `&mut
/// self`, so overlapping runs on the same context do not compile.
#[derive(Debug)]
pub struct ModelContext {
    model: GptJModel,
    vocab: Vocabulary,
    scratch: ScratchArena,
}

impl ModelContext {
    /// Loads a model file and prepares it for generation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let ModelFile {
            hparams,
            vocab,
            weights,
        } = ModelFile::read(path)?;
        let model = GptJModel::new(hparams, weights, &Device::Cpu)?;
        Ok(Self {
            model,
            vocab,
            scratch: ScratchArena::new(),
        })
    }

    /// The model's vocabulary.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Context window length in tokens.
    pub fn n_ctx(&self) -> usize {
        self.model.n_ctx()
    }

    /// Number of tokens `text` encodes to.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.vocab.encode(text).len()
    }

    /// Generates a continuation of `prompt`, streaming each token's
    /// text to `on_token`. Returns the number of sampled tokens.
    pub fn generate(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        on_token: impl FnMut(&str) -> bool,
    ) -> Result<usize> {
        let ids = self.vocab.encode(prompt);
        info!("prompt encoded to {} tokens", ids.len());
        run_generation(
            &mut self.model,
            &self.vocab,
            &ids,
            config,
            &mut self.scratch,
            on_token,
        )
    }
}
