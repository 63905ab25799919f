//! NEREL reader for pre-built instruction files
//!
//! NEREL instructions are prepared offline and stored as JSON arrays of
//! [`Instruction`] objects, one file per split.

use crate::datasets::{resolve_split_file, truncate, DatasetOptions, Split};
use crate::error::{Error, Result};
use crate::ner::Instruction;
use std::path::Path;

fn split_file_names(split: Split) -> &'static [&'static str] {
    match split {
        Split::Train => &["train_data.jsonl", "train_data.json"],
        Split::Validation => &["val_data.jsonl", "val_data.json", "dev_data.jsonl"],
        Split::Test => &["test_data.jsonl", "test_data.json"],
    }
}

/// Read instructions from a JSON array or JSON-lines file
pub fn read_instructions(path: &Path) -> Result<Vec<Instruction>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
    let trimmed = content.trim_start();

    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Error::from))
        .collect()
}

/// Load one split
///
/// `data_path` may be the directory holding the split files or a single
/// instruction file.
pub fn load_split(options: &DatasetOptions, split: Split) -> Result<Vec<Instruction>> {
    let path = if options.data_path.is_file() {
        options.data_path.clone()
    } else {
        resolve_split_file(&options.data_path, split_file_names(split))?
    };
    Ok(truncate(read_instructions(&path)?, options.max_instances))
}
