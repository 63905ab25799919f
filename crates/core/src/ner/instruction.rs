//! Instruction records
//!
//! An instruction pairs a rendered prompt (`source`) with the expected
//! answer (`output`) for one annotated text. The JSON layout matches the
//! pre-built instruction files used for NEREL.

use crate::ner::entity::{group_entities, Entity};
use crate::ner::prompt::{create_output_from_entities, OutputFormat, PromptTemplate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One instruction/response pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Task description shown to the model
    pub instruction: String,

    /// The raw input text
    pub input: String,

    /// Expected answer
    pub output: String,

    /// Full model input: the rendered prompt
    pub source: String,

    /// Entity texts grouped by type
    pub raw_entities: BTreeMap<String, Vec<String>>,

    /// Record identifier
    pub id: String,
}

/// Everything needed to turn an annotated text into an [`Instruction`]
#[derive(Clone, Debug)]
pub struct InstructionFormat<'a> {
    /// Task description
    pub instruction: &'a str,

    /// Entity types, in answer order
    pub entity_types: &'a [&'a str],

    /// Prompt template
    pub template: PromptTemplate,

    /// Answer layout
    pub output: OutputFormat,
}

impl<'a> InstructionFormat<'a> {
    /// Build an instruction from grouped entities
    pub fn build(
        &self,
        id: impl Into<String>,
        input: impl Into<String>,
        raw_entities: BTreeMap<String, Vec<String>>,
    ) -> Instruction {
        let input = input.into();
        let output = create_output_from_entities(&raw_entities, self.entity_types, self.output);
        let source = self.template.render(self.instruction, &input);

        Instruction {
            instruction: self.instruction.to_string(),
            input,
            output,
            source,
            raw_entities,
            id: id.into(),
        }
    }

    /// Build an instruction from entity spans
    ///
    /// Spans whose label is not in the entity type list are dropped.
    pub fn build_from_spans(
        &self,
        id: impl Into<String>,
        input: impl Into<String>,
        entities: &[Entity],
    ) -> Instruction {
        let grouped = group_entities(entities, self.entity_types);
        self.build(id, input, grouped)
    }
}

impl Instruction {
    /// Number of entity mentions across all types
    pub fn num_entities(&self) -> usize {
        self.raw_entities.values().map(Vec::len).sum()
    }
}
