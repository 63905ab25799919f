//! Experiment and generation configuration

use crate::error::{Error, Result};
use crate::training::{LoRAConfig, TokenizationSettings, TrainerArgs};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

fn default_true() -> bool {
    true
}

/// Contents of an experiment JSON file such as `configs/llama_7b_lora.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Base model or adapter, as a hub id or local directory
    pub model_name: String,

    /// Adapter hyperparameters
    #[serde(default)]
    pub lora: LoRAConfig,

    /// Mask the prompt out of the loss
    #[serde(default = "default_true")]
    pub only_target_loss: bool,

    /// Prompt token budget
    pub max_source_tokens_count: usize,

    /// Answer token budget
    pub max_target_tokens_count: usize,

    /// Accepted for compatibility, never honored
    #[serde(default = "default_true")]
    pub load_in_8bit: bool,

    /// `model_name` points at a trained adapter to continue from
    #[serde(default)]
    pub is_adapter: bool,

    /// Trainer hyperparameters
    #[serde(default)]
    pub trainer: TrainerArgs,

    /// Accepted for compatibility, never honored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deepspeed: Option<serde_json::Value>,
}

impl ExperimentConfig {
    /// Read a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(format!("config file {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values and warn about options that are accepted but ignored
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(Error::Configuration("model_name is empty".to_string()));
        }
        if self.max_source_tokens_count == 0 || self.max_target_tokens_count == 0 {
            return Err(Error::Configuration(
                "max_source_tokens_count and max_target_tokens_count must be positive".to_string(),
            ));
        }
        self.lora.validate()?;
        self.trainer.validate()?;

        if self.load_in_8bit {
            warn!("load_in_8bit is not supported, loading full-precision weights");
        }
        if self.deepspeed.is_some() {
            warn!("deepspeed config ignored");
        }
        for key in self.trainer.extra.keys() {
            warn!(key = %key, "trainer option ignored");
        }
        Ok(())
    }

    /// Tokenization limits derived from the config
    pub fn tokenization(&self) -> TokenizationSettings {
        TokenizationSettings {
            max_source_tokens_count: self.max_source_tokens_count,
            max_target_tokens_count: self.max_target_tokens_count,
            only_target_loss: self.only_target_loss,
        }
    }

    /// Generation length limit stored on the model
    pub fn max_length(&self) -> usize {
        self.max_source_tokens_count + self.max_target_tokens_count + 1
    }
}

/// Decoding parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Sample instead of taking the arg max
    pub do_sample: bool,

    /// Tokens generated after the prompt
    pub max_new_tokens: usize,

    /// Ban repeating n-grams of this size, 0 disables
    pub no_repeat_ngram_size: usize,

    /// Beam count, 1 disables beam search
    pub num_beams: usize,

    /// Padding id
    pub pad_token_id: u32,

    /// End-of-sequence id, taken from the tokenizer when absent
    pub eos_token_id: Option<u32>,

    /// CTRL-style repetition penalty, 1.0 disables
    pub repetition_penalty: f32,

    /// Softmax temperature
    pub temperature: f32,

    /// Keep the k most likely tokens, 0 disables
    pub top_k: usize,

    /// Nucleus mass, 1.0 disables
    pub top_p: f32,

    /// Stop beam search once `num_beams` hypotheses finished
    pub early_stopping: bool,

    /// Exponent on the length in beam scores
    pub length_penalty: f32,

    /// RNG seed for sampling
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            do_sample: true,
            max_new_tokens: 512,
            no_repeat_ngram_size: 20,
            num_beams: 3,
            pad_token_id: 0,
            eos_token_id: None,
            repetition_penalty: 1.1,
            temperature: 0.9,
            top_k: 30,
            top_p: 0.85,
            early_stopping: true,
            length_penalty: 1.0,
            seed: 42,
        }
    }
}

impl GenerationConfig {
    /// Plain arg max decoding
    pub fn greedy() -> Self {
        Self {
            do_sample: false,
            num_beams: 1,
            repetition_penalty: 1.0,
            no_repeat_ngram_size: 0,
            top_k: 0,
            top_p: 1.0,
            temperature: 1.0,
            ..Default::default()
        }
    }

    /// Set max new tokens
    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Set beam count
    pub fn with_num_beams(mut self, num_beams: usize) -> Self {
        self.num_beams = num_beams.max(1);
        self
    }

    /// Set sampling
    pub fn with_sampling(mut self, do_sample: bool) -> Self {
        self.do_sample = do_sample;
        self
    }

    /// Set seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.max(1e-4);
        self
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.num_beams == 0 {
            return Err(Error::Configuration("num_beams must be at least 1".to_string()));
        }
        if self.temperature <= 0.0 {
            return Err(Error::Configuration(format!("temperature must be positive, got {}", self.temperature)));
        }
        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            return Err(Error::Configuration(format!("top_p must be in (0, 1], got {}", self.top_p)));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(Error::Configuration(format!(
                "repetition_penalty must be positive, got {}",
                self.repetition_penalty
            )));
        }
        Ok(())
    }
}
