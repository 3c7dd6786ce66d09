//! GPT-J model: embedding, decoder stack, final norm, and lm head.
//!
//! The forward pass takes a batch of token ids at absolute positions
//! `n_past ..` and returns the logits of the last position only. All
//! weights are resolved to f32 tensors once at construction; the
//! persistent KV cache lives with the model.

use candle_core::{Device, Module, Tensor};
use candle_nn::{Embedding, Linear};
use log::{debug, info};

use crate::error::{Error, Result};
use crate::model::attention::CausalSelfAttention;
use crate::model::decoder::DecoderLayer;
use crate::model::kv_cache::KvCache;
use crate::model::loader::{Hyperparams, WeightRegistry};
use crate::model::mlp::Mlp;
use crate::model::norm::LayerNorm;
use crate::model::rope::RotaryEmbedding;
use crate::model::scratch::ScratchArena;
use crate::vocab::TokenId;

const LN_EPS: f64 = 1e-5;
const ROPE_THETA: f64 = 10000.0;

/// GPT-J causal language model.
#[derive(Debug)]
pub struct GptJModel {
    hparams: Hyperparams,
    wte: Embedding,
    layers: Vec<DecoderLayer>,
    ln_f: LayerNorm,
    lm_head: Linear,
    cache: KvCache,
    device: Device,
}

impl GptJModel {
    /// Resolves loaded weights into backend tensors and builds the
    /// decoder stack. Consumes the registry; after this no weight is
    /// reachable by name.
    pub fn new(hparams: Hyperparams, mut weights: WeightRegistry, device: &Device) -> Result<Self> {
        let wte = Embedding::new(
            weights.take("transformer.wte.weight", device)?,
            hparams.n_embd,
        );

        let mut layers = Vec::with_capacity(hparams.n_layer);
        for i in 0..hparams.n_layer {
            let p = format!("transformer.h.{i}");
            let ln_1 = LayerNorm::new(
                weights.take(&format!("{p}.ln_1.weight"), device)?,
                weights.take(&format!("{p}.ln_1.bias"), device)?,
                LN_EPS,
            );
            let rope = RotaryEmbedding::new(hparams.n_rot, hparams.n_ctx, ROPE_THETA, device)?;
            let attn = CausalSelfAttention::new(
                weights.take(&format!("{p}.attn.q_proj.weight"), device)?,
                weights.take(&format!("{p}.attn.k_proj.weight"), device)?,
                weights.take(&format!("{p}.attn.v_proj.weight"), device)?,
                weights.take(&format!("{p}.attn.out_proj.weight"), device)?,
                rope,
                hparams.n_head,
                hparams.n_embd,
            );
            let mlp = Mlp::new(
                weights.take(&format!("{p}.mlp.fc_in.weight"), device)?,
                weights.take(&format!("{p}.mlp.fc_in.bias"), device)?,
                weights.take(&format!("{p}.mlp.fc_out.weight"), device)?,
                weights.take(&format!("{p}.mlp.fc_out.bias"), device)?,
            );
            layers.push(DecoderLayer::new(ln_1, attn, mlp));
        }

        let ln_f = LayerNorm::new(
            weights.take("transformer.ln_f.weight", device)?,
            weights.take("transformer.ln_f.bias", device)?,
            LN_EPS,
        );
        let lm_head = Linear::new(
            weights.take("lm_head.weight", device)?,
            Some(weights.take("lm_head.bias", device)?),
        );

        let cache = KvCache::new(hparams.n_layer, hparams.n_ctx, hparams.n_embd, device)?;
        info!("kv cache: {} bytes", cache.size_in_bytes());

        Ok(Self {
            hparams,
            wte,
            layers,
            ln_f,
            lm_head,
            cache,
            device: device.clone(),
        })
    }

    /// Creates a model with random weights for testing.
    pub fn new_random(hparams: Hyperparams, device: &Device) -> Result<Self> {
        let scale = 0.02;
        let wte_weight =
            Tensor::randn(0.0f32, scale, (hparams.n_vocab, hparams.n_embd), device)?;
        let wte = Embedding::new(wte_weight, hparams.n_embd);

        let mut layers = Vec::with_capacity(hparams.n_layer);
        for _ in 0..hparams.n_layer {
            layers.push(DecoderLayer::new_random(
                hparams.n_embd,
                hparams.n_head,
                hparams.n_rot,
                hparams.n_ctx,
                device,
            )?);
        }

        let ln_f =
            LayerNorm::new_identity(hparams.n_embd, LN_EPS, candle_core::DType::F32, device)?;
        let head_weight =
            Tensor::randn(0.0f32, scale, (hparams.n_vocab, hparams.n_embd), device)?;
        let head_bias = Tensor::zeros(hparams.n_vocab, candle_core::DType::F32, device)?;
        let lm_head = Linear::new(head_weight, Some(head_bias));

        let cache = KvCache::new(hparams.n_layer, hparams.n_ctx, hparams.n_embd, device)?;

        Ok(Self {
            hparams,
            wte,
            layers,
            ln_f,
            lm_head,
            cache,
            device: device.clone(),
        })
    }

    /// Model hyperparameters.
    pub fn hparams(&self) -> &Hyperparams {
        &self.hparams
    }

    /// Context window length.
    pub fn n_ctx(&self) -> usize {
        self.hparams.n_ctx
    }

    /// Transient working-memory estimate per token, in bytes.
    ///
    /// Counts the f32 hidden-state copies each layer produces, the
    /// attention score rows, and the logits row.
    fn scratch_per_token(&self) -> usize {
        let h = &self.hparams;
        let hidden_copies = 8 * h.n_embd + 2 * h.n_ff();
        (h.n_layer * hidden_copies + h.n_head * h.n_ctx + h.n_vocab) * 4
    }

    /// Runs the forward pass for `tokens` at positions `n_past ..` and
    /// returns the logits of the last token.
    pub fn evaluate(
        &mut self,
        n_past: usize,
        tokens: &[TokenId],
        scratch: &mut ScratchArena,
    ) -> Result<Vec<f32>> {
        let n = tokens.len();
        if n == 0 {
            return Err(Error::EmptyPrompt);
        }

        if scratch.per_token().is_none() {
            scratch.record_per_token(self.scratch_per_token());
        }
        scratch.ensure(n)?;
        debug!("evaluate: n_past={n_past} n_tokens={n}");

        let ids = Tensor::from_vec(tokens.to_vec(), n, &self.device)?;
        let mut x = self.wte.forward(&ids)?;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x, self.cache.layer(i), n_past)?;
        }
        let x = self.ln_f.forward(&x)?;

        let last = x.narrow(0, n - 1, 1)?;
        let logits = self.lm_head.forward(&last)?;
        Ok(logits.flatten_all()?.to_vec1::<f32>()?)
    }
}
