//! Model loading and the forward-pass evaluator.

pub mod attention;
pub mod decoder;
pub mod gptj;
pub mod kv_cache;
pub mod loader;
pub mod mlp;
pub mod norm;
pub mod quant;
pub mod rope;
pub mod scratch;

pub use gptj::GptJModel;
pub use kv_cache::KvCache;
pub use loader::{Hyperparams, ModelFile, WeightRegistry, MODEL_MAGIC};
pub use quant::WeightType;
pub use scratch::ScratchArena;
