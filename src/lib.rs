//! nano-gptj: a minimalistic GPT-J inference engine in Rust.
//!
//! The crate loads a GPT-J model from a binary weight file and runs
//! single-request autoregressive generation on the CPU:
//! - longest-match tokenizer over the file's vocabulary
//! - temperature / top-k / top-p sampling
//! - forward pass with rotary attention and a persistent KV cache
//! - streaming generation driver with a token callback

pub mod config;
pub mod error;

pub mod engine;
pub mod model;
pub mod vocab;

pub use config::GenerationConfig;
pub use engine::{run_generation, Evaluate, ModelContext, Sampler};
pub use error::{Error, Result};
pub use model::{GptJModel, Hyperparams, ModelFile, ScratchArena, WeightType};
pub use vocab::{TokenId, Vocabulary};
