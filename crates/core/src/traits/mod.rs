//! Core trait definitions

pub mod model;
pub mod tokenizer;

pub use model::*;
pub use tokenizer::*;
