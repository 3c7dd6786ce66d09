//! Error types for nano-gptj.

use thiserror::Error;

/// Result type alias for nano-gptj operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nano-gptj.
#[derive(Error, Debug)]
pub enum Error {
    /// Model file does not start with the expected magic number.
    #[error("bad magic {magic:#010x} in model file {path}")]
    InvalidMagic { magic: u32, path: String },

    /// Weight storage format tag is not one this engine can decode.
    #[error("unsupported weight format tag {0}")]
    UnsupportedFormat(i32),

    /// A hyperparameter read from the model file is out of range.
    #[error("invalid hyperparameter {name}: {value}")]
    InvalidHyperparameter { name: &'static str, value: i64 },

    /// Vocabulary entry count disagrees with the n_vocab hyperparameter.
    #[error("vocabulary has {found} entries, hyperparameters declare {expected}")]
    VocabSizeMismatch { expected: usize, found: usize },

    /// Tensor record names a tensor the architecture does not define.
    #[error("unknown tensor '{0}' in model file")]
    UnknownTensor(String),

    /// Tensor record shape disagrees with the architecture-defined shape.
    #[error("tensor '{name}' has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Tensor payload size disagrees with its shape and element width.
    #[error("tensor '{name}' payload is {found} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// A tensor the architecture requires never appeared in the file.
    #[error("tensor '{0}' missing from model file")]
    MissingTensor(String),

    /// A memory reservation could not be satisfied.
    #[error("failed to reserve {bytes} bytes for {what}")]
    OutOfMemory { what: &'static str, bytes: usize },

    /// Prompt does not leave room for generation within the context window.
    #[error("prompt of {prompt} tokens does not fit context window of {n_ctx}")]
    PromptTooLong { prompt: usize, n_ctx: usize },

    /// Prompt tokenized to nothing.
    #[error("empty prompt")]
    EmptyPrompt,

    /// Sampling failed (degenerate probability distribution).
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
