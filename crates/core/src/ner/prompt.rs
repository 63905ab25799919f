//! Prompt templates and answer formatting

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Language of the prompt scaffolding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLanguage {
    /// Russian headers, used for the Russian corpora
    Russian,

    /// English headers
    English,
}

/// Instruction prompt template
///
/// A prompt has three headed sections: the task, the input text and the
/// answer header. The model continues the text after the answer header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    task_header: &'static str,
    input_header: &'static str,
    answer_header: &'static str,
}

impl PromptTemplate {
    /// Template for a language
    pub const fn for_language(language: PromptLanguage) -> Self {
        match language {
            PromptLanguage::Russian => Self {
                task_header: "Задание",
                input_header: "Вход",
                answer_header: "Ответ",
            },
            PromptLanguage::English => Self {
                task_header: "Task",
                input_header: "Input",
                answer_header: "Answer",
            },
        }
    }

    /// Russian template
    pub const fn russian() -> Self {
        Self::for_language(PromptLanguage::Russian)
    }

    /// English template
    pub const fn english() -> Self {
        Self::for_language(PromptLanguage::English)
    }

    /// Render the model input for an instruction and input text
    pub fn render(&self, instruction: &str, input: &str) -> String {
        format!(
            "### {}: {}\n### {}: {}\n### {}: ",
            self.task_header, instruction, self.input_header, input, self.answer_header
        )
    }

    /// The string that precedes the generated answer
    pub fn answer_separator(&self) -> String {
        format!("{}: ", self.answer_header)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::russian()
    }
}

/// How the expected answer lists entities
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One line per entity type: `TYPE: a, b`. Empty types are kept.
    #[default]
    Short,

    /// One line per entity: `TYPE: a`. Empty types are omitted.
    Long,
}

impl OutputFormat {
    /// Map the `short_form_output` flag
    pub fn from_short_form(short_form_output: bool) -> Self {
        if short_form_output {
            Self::Short
        } else {
            Self::Long
        }
    }
}

/// Build the target answer text from grouped entities
///
/// Types are written in the order of `entity_types`; entity texts keep
/// their order within a type.
pub fn create_output_from_entities(
    entities: &BTreeMap<String, Vec<String>>,
    entity_types: &[&str],
    format: OutputFormat,
) -> String {
    let mut output = String::new();

    for entity_type in entity_types {
        let texts = entities.get(*entity_type).map(Vec::as_slice).unwrap_or(&[]);
        match format {
            OutputFormat::Short => {
                output.push_str(entity_type);
                output.push_str(": ");
                output.push_str(&texts.join(", "));
                output.push('\n');
            }
            OutputFormat::Long => {
                for text in texts {
                    output.push_str(entity_type);
                    output.push_str(": ");
                    output.push_str(text);
                    output.push('\n');
                }
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities() -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        map.insert("PER".to_string(), vec!["John".to_string(), "Mary".to_string()]);
        map.insert("LOC".to_string(), vec!["Paris".to_string()]);
        map.insert("ORG".to_string(), Vec::new());
        map
    }

    #[test]
    fn test_render_russian() {
        let prompt = PromptTemplate::russian().render("Найди сущности", "Текст");
        assert_eq!(prompt, "### Задание: Найди сущности\n### Вход: Текст\n### Ответ: ");
        assert_eq!(PromptTemplate::russian().answer_separator(), "Ответ: ");
    }

    #[test]
    fn test_render_english() {
        let prompt = PromptTemplate::english().render("Find entities", "John went home");
        assert!(prompt.starts_with("### Task: Find entities\n"));
        assert!(prompt.ends_with("### Answer: "));
    }

    #[test]
    fn test_short_output_keeps_type_order_and_empty_types() {
        let output = create_output_from_entities(&entities(), &["PER", "ORG", "LOC"], OutputFormat::Short);
        assert_eq!(output, "PER: John, Mary\nORG: \nLOC: Paris\n");
    }

    #[test]
    fn test_long_output_one_line_per_entity() {
        let output = create_output_from_entities(&entities(), &["PER", "ORG", "LOC"], OutputFormat::Long);
        assert_eq!(output, "PER: John\nPER: Mary\nLOC: Paris\n");
    }

    #[test]
    fn test_output_format_flag() {
        assert_eq!(OutputFormat::from_short_form(true), OutputFormat::Short);
        assert_eq!(OutputFormat::from_short_form(false), OutputFormat::Long);
    }
}
