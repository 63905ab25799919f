//! Generation, batch prediction and LoRA training for instruction NER
//!
//! [`Generator`] decodes with greedy, sampling, beam or beam-sample search
//! over any [`instruct_ner_core::traits::model::CausalLm`].
//! [`PredictionEngine`] turns instructions into parsed entities and
//! [`LoraTrainer`] fine-tunes an adapter.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod beam;
pub mod engine;
pub mod generator;
pub mod predictions;
pub mod training;

pub use beam::{beam_search, BeamHypotheses, Hypothesis};
pub use engine::PredictionEngine;
pub use generator::{Generator, LogitsProcessor};
pub use predictions::{EntityMap, PredictionRecord, PredictionTable};
pub use training::{
    checkpoints_to_delete, LoggingCallback, LoraTrainer, MetricsJsonCallback, ProgressCallback, ADAPTER_SUBDIR,
};
