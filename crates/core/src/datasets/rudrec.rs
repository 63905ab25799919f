//! RuDReC reader
//!
//! The annotated corpus is a JSON-lines file, one sentence per line:
//! `{"file_name": ..., "sentence_id": ..., "text": ..., "entities": [...]}`.
//! A single JSON array of the same objects is accepted too.

use crate::datasets::{train_test_split, truncate, CorpusProfile, DatasetName, DatasetOptions};
use crate::error::{Error, Result};
use crate::ner::{group_entities, Entity, Instruction, InstructionFormat};
use serde::Deserialize;
use std::path::Path;

/// One annotated sentence
#[derive(Clone, Debug, Deserialize)]
pub struct RudrecSentence {
    #[serde(default)]
    pub file_name: String,

    #[serde(default)]
    pub sentence_id: Option<serde_json::Value>,

    pub text: String,

    #[serde(default)]
    pub entities: Vec<RudrecEntity>,
}

/// One annotated mention
#[derive(Clone, Debug, Deserialize)]
pub struct RudrecEntity {
    pub entity_type: String,
    pub entity_text: String,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
}

impl RudrecSentence {
    /// Stable identifier: `{file_name}_{sentence_id}`, falling back to the index
    pub fn id(&self, index: usize) -> String {
        let sentence = match &self.sentence_id {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => index.to_string(),
            Some(other) => other.to_string(),
        };
        if self.file_name.is_empty() {
            sentence
        } else {
            format!("{}_{}", self.file_name, sentence)
        }
    }

    fn spans(&self) -> Vec<Entity> {
        self.entities
            .iter()
            .map(|e| {
                Entity::new(
                    e.entity_text.trim(),
                    e.entity_type.as_str(),
                    e.start.unwrap_or(0),
                    e.end.unwrap_or(0),
                )
            })
            .collect()
    }
}

/// Parse annotated sentences from file content
pub fn parse_sentences(content: &str) -> Result<Vec<RudrecSentence>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| Error::Dataset(format!("rudrec line {}: {}", i + 1, e)))
        })
        .collect()
}

/// Read annotated sentences from disk
pub fn read_sentences(path: &Path) -> Result<Vec<RudrecSentence>> {
    if !path.is_file() {
        return Err(Error::NotFound(format!("rudrec file {}", path.display())));
    }
    let content = std::fs::read_to_string(path)?;
    parse_sentences(&content)
}

/// Turn sentences into instructions
pub fn create_instructions(sentences: &[RudrecSentence], format: &InstructionFormat<'_>) -> Vec<Instruction> {
    sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let spans = sentence.spans();
            let grouped = group_entities(&spans, format.entity_types);
            format.build(sentence.id(i), sentence.text.as_str(), grouped)
        })
        .collect()
}

/// Build the seeded train/test split
pub fn create_train_test_instruct_datasets(
    options: &DatasetOptions,
) -> Result<(Vec<Instruction>, Vec<Instruction>)> {
    let sentences = truncate(read_sentences(&options.data_path)?, options.max_instances);
    let profile = CorpusProfile::new(DatasetName::Rudrec, false);
    let instructions = create_instructions(&sentences, &profile.format(options.output_format));
    Ok(train_test_split(instructions, options.test_size, options.seed))
}
