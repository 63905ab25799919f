//! Candle backend for instruction NER
//!
//! LLaMA with LoRA-injected projections, the HF tokenizer, masked loss,
//! learning rate schedules and PEFT-compatible adapter files.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod candle_model;
pub mod config;
pub mod llama;
pub mod loader;
pub mod lora_layer;
pub mod loss;
pub mod lr_schedule;
pub mod tokenizer;

// Re-exports
pub use adapter::{apply_adapter_weights, load_adapter, save_adapter};
pub use candle_model::{dtype_from_torch_name, to_candle_device, to_candle_dtype, ToNerResult};
pub use config::LlamaConfig;
pub use llama::{random_weights, LlamaCache, LlamaForCausalLM, ParameterCount, PEFT_PREFIX};
pub use loader::{fetch_adapter, fetch_model, load_model, LoadOptions, LoadedModel, ModelFiles};
pub use lora_layer::{LoraLinear, LoraWeights};
pub use loss::{masked_cross_entropy, perplexity};
pub use lr_schedule::{LrSchedule, LrScheduleBuilder};
pub use tokenizer::HFTokenizerWrapper;
