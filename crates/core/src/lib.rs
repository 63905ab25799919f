//! Instruction NER Core Library
//!
//! This library provides the core functionality for instruction-tuned NER:
//! corpus readers, prompt building, tokenized training data, answer
//! extraction, metrics, configuration and the traits model backends
//! implement.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod datasets;
pub mod error;
pub mod ner;
pub mod traits;
pub mod training;

pub use config::{ExperimentConfig, GenerationConfig};
pub use datasets::{load_test, load_train_eval, DatasetName, DatasetOptions, Split};
pub use error::{Error, Result};
pub use ner::*;
pub use traits::*;
pub use training::*;
