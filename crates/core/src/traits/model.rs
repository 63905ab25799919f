//! Model traits and identifiers

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Supported model families
///
/// `llama2` shares the LLaMA architecture; the name only tags artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ModelType {
    #[default]
    Llama,
    Llama2,
}

impl ModelType {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llama => "llama",
            Self::Llama2 => "llama2",
        }
    }
}

impl FromStr for ModelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llama" => Ok(Self::Llama),
            "llama2" => Ok(Self::Llama2),
            other => Err(Error::Configuration(format!(
                "unsupported model type '{}', expected llama or llama2",
                other
            ))),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Autoregressive language model used for generation
///
/// The cache carries attention state between calls. Each call feeds the
/// tokens appended since the previous call and returns the logits for the
/// next position. Caches are cloned when beams fork.
pub trait CausalLm: Send + Sync {
    /// Per-sequence decoding state
    type Cache: Clone;

    /// Fresh cache for a new sequence
    fn new_cache(&self) -> Result<Self::Cache>;

    /// Feed `tokens` and return next-token logits over the vocabulary
    fn forward_step(&self, tokens: &[u32], cache: &mut Self::Cache) -> Result<Vec<f32>>;

    /// Vocabulary size (length of returned logits)
    fn vocab_size(&self) -> usize;

    /// Longest sequence the model accepts
    fn max_seq_len(&self) -> usize;
}
