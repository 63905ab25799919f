//! Instruction NER building blocks: records, prompts, answer parsing, metrics

pub mod entity;
pub mod instruction;
pub mod metrics;
pub mod parser;
pub mod prompt;

pub use entity::*;
pub use instruction::*;
pub use metrics::*;
pub use parser::*;
pub use prompt::*;
