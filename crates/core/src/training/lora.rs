//! LoRA (Low-Rank Adaptation) configuration
//!
//! Field names follow the PEFT `LoraConfig` so experiment configs and
//! `adapter_config.json` files are shared with the Python ecosystem.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of a saved adapter configuration
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";

/// File name of saved adapter weights
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

fn default_rank() -> usize {
    8
}

fn default_alpha() -> f32 {
    16.0
}

fn default_dropout() -> f32 {
    0.05
}

fn default_target_modules() -> Vec<String> {
    vec!["q_proj".to_string(), "v_proj".to_string()]
}

fn default_task_type() -> String {
    "CAUSAL_LM".to_string()
}

/// LoRA configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoRAConfig {
    /// Rank of the LoRA matrices
    #[serde(default = "default_rank")]
    pub r: usize,

    /// Alpha scaling factor
    #[serde(default = "default_alpha")]
    pub lora_alpha: f32,

    /// Dropout probability on the adapter input
    #[serde(default = "default_dropout")]
    pub lora_dropout: f32,

    /// Projection names LoRA is applied to
    #[serde(default = "default_target_modules")]
    pub target_modules: Vec<String>,

    /// Bias training strategy
    #[serde(default)]
    pub bias: LoRABias,

    /// PEFT task type
    #[serde(default = "default_task_type")]
    pub task_type: String,
}

impl LoRAConfig {
    /// Create a new LoRA config
    pub fn new(r: usize, lora_alpha: f32) -> Self {
        Self {
            r,
            lora_alpha,
            lora_dropout: default_dropout(),
            target_modules: default_target_modules(),
            bias: LoRABias::None,
            task_type: default_task_type(),
        }
    }

    /// Set rank
    pub fn with_rank(mut self, r: usize) -> Self {
        self.r = r;
        self
    }

    /// Set alpha
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.lora_alpha = alpha;
        self
    }

    /// Set dropout
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.lora_dropout = dropout.clamp(0.0, 1.0);
        self
    }

    /// Set target modules
    pub fn with_target_modules<S: Into<String>>(mut self, modules: impl IntoIterator<Item = S>) -> Self {
        self.target_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Set bias strategy
    pub fn with_bias(mut self, bias: LoRABias) -> Self {
        self.bias = bias;
        self
    }

    /// Get the effective scaling factor
    pub fn scaling(&self) -> f32 {
        self.lora_alpha / self.r as f32
    }

    /// Check if a projection receives an adapter
    pub fn targets(&self, module: &str) -> bool {
        self.target_modules.iter().any(|m| m == module)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.r == 0 {
            return Err(Error::LoRA("rank r must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.lora_dropout) {
            return Err(Error::LoRA(format!(
                "lora_dropout must be in [0, 1), got {}",
                self.lora_dropout
            )));
        }
        if self.target_modules.is_empty() {
            return Err(Error::LoRA("target_modules is empty".to_string()));
        }
        Ok(())
    }
}

impl Default for LoRAConfig {
    fn default() -> Self {
        Self::new(default_rank(), default_alpha())
    }
}

/// Bias training strategy for LoRA
///
/// Only `None` changes nothing in the base model. The other modes are kept
/// for config compatibility; biases of LLaMA projections do not exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoRABias {
    /// Don't train any bias
    #[default]
    None,

    /// Train all biases
    All,

    /// Train only LoRA biases
    LoraOnly,
}

/// Contents of `adapter_config.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Base model the adapter was trained on
    pub base_model_name_or_path: String,

    /// Always `LORA`
    #[serde(default = "AdapterConfig::peft_type_default")]
    pub peft_type: String,

    /// Whether the adapter was saved for inference only
    #[serde(default)]
    pub inference_mode: bool,

    /// LoRA hyperparameters
    #[serde(flatten)]
    pub lora: LoRAConfig,
}

impl AdapterConfig {
    fn peft_type_default() -> String {
        "LORA".to_string()
    }

    /// Create an adapter config
    pub fn new(base_model_name_or_path: impl Into<String>, lora: LoRAConfig) -> Self {
        Self {
            base_model_name_or_path: base_model_name_or_path.into(),
            peft_type: Self::peft_type_default(),
            inference_mode: true,
            lora,
        }
    }

    /// Read `adapter_config.json` from an adapter directory
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(ADAPTER_CONFIG_FILE);
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        if config.peft_type != "LORA" {
            return Err(Error::LoRA(format!(
                "unsupported peft_type '{}' in {}",
                config.peft_type,
                path.display()
            )));
        }
        Ok(config)
    }

    /// Write `adapter_config.json` into a directory
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        std::fs::create_dir_all(dir.as_ref())?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.as_ref().join(ADAPTER_CONFIG_FILE), content)?;
        Ok(())
    }
}

/// Check if a directory (or hub snapshot) holds a PEFT adapter
pub fn is_adapter_dir(dir: impl AsRef<Path>) -> bool {
    dir.as_ref().join(ADAPTER_CONFIG_FILE).is_file()
}
