//! LLaMA configuration as found in HF `config.json`

use instruct_ner_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_rms_norm_eps() -> f64 {
    1e-6
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_max_position_embeddings() -> usize {
    2048
}

/// Architecture hyperparameters of a LLaMA checkpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlamaConfig {
    /// Model width
    pub hidden_size: usize,

    /// MLP width
    pub intermediate_size: usize,

    /// Vocabulary size
    pub vocab_size: usize,

    /// Number of decoder layers
    pub num_hidden_layers: usize,

    /// Number of query heads
    pub num_attention_heads: usize,

    /// Number of key/value heads, equal to the query heads without GQA
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,

    /// RMSNorm epsilon
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,

    /// RoPE base
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,

    /// Longest supported sequence
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,

    /// Share the embedding matrix with the LM head
    #[serde(default)]
    pub tie_word_embeddings: bool,

    /// Beginning-of-sequence id
    #[serde(default)]
    pub bos_token_id: Option<u32>,

    /// End-of-sequence id, a number or a list in newer configs
    #[serde(default)]
    pub eos_token_id: Option<serde_json::Value>,

    /// Padding id
    #[serde(default)]
    pub pad_token_id: Option<u32>,

    /// Checkpoint dtype name
    #[serde(default)]
    pub torch_dtype: Option<String>,
}

impl LlamaConfig {
    /// Read a `config.json`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ModelLoading(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::ModelLoading(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check head layout consistency
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::ModelLoading(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_attention_heads % self.num_kv_heads() != 0 {
            return Err(Error::ModelLoading(format!(
                "num_attention_heads {} is not a multiple of num_key_value_heads {}",
                self.num_attention_heads,
                self.num_kv_heads()
            )));
        }
        Ok(())
    }

    /// Key/value head count
    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads).max(1)
    }

    /// Per-head width
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// First end-of-sequence id
    pub fn eos_token_id(&self) -> Option<u32> {
        match self.eos_token_id.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().map(|id| id as u32),
            serde_json::Value::Array(ids) => ids.first()?.as_u64().map(|id| id as u32),
            _ => None,
        }
    }

    /// A small configuration for tests and smoke runs
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            hidden_size: 32,
            intermediate_size: 64,
            vocab_size,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            num_key_value_heads: Some(2),
            rms_norm_eps: 1e-5,
            rope_theta: default_rope_theta(),
            max_position_embeddings: 256,
            tie_word_embeddings: false,
            bos_token_id: Some(1),
            eos_token_id: Some(serde_json::json!(2)),
            pad_token_id: None,
            torch_dtype: None,
        }
    }
}
