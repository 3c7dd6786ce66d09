//! Generation engine: sampling and the generation driver.

pub mod generator;
pub mod sampler;

pub use generator::{run_generation, Evaluate, ModelContext};
pub use sampler::{shortlist, Sampler};
