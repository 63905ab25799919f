//! Parsing generated answers back into typed entities

use std::collections::BTreeMap;

/// Special-token residue that may survive decoding
const RESIDUE: &[&str] = &["</s>", "<s>", "<unk>", "<pad>"];

/// Parser for `TYPE: a, b` style answers
#[derive(Clone, Debug)]
pub struct AnswerParser {
    /// Text that precedes the answer in the prompt
    separator: String,

    /// Entity types to look for
    entity_types: Vec<String>,
}

impl AnswerParser {
    /// Create a new answer parser
    pub fn new<S: AsRef<str>>(separator: impl Into<String>, entity_types: &[S]) -> Self {
        Self {
            separator: separator.into(),
            entity_types: entity_types.iter().map(|t| t.as_ref().to_string()).collect(),
        }
    }

    /// Entity types this parser extracts
    pub fn entity_types(&self) -> &[String] {
        &self.entity_types
    }

    /// Extract entities from a generated text
    ///
    /// The answer starts after the last separator; without a separator the
    /// whole text is parsed. Every known type is present in the result.
    pub fn parse(&self, generated: &str) -> BTreeMap<String, Vec<String>> {
        let answer = match generated.rfind(&self.separator) {
            Some(pos) => &generated[pos + self.separator.len()..],
            None => generated,
        };
        let answer = strip_residue(answer);

        let mut result: BTreeMap<String, Vec<String>> = self
            .entity_types
            .iter()
            .map(|t| (t.clone(), Vec::new()))
            .collect();

        let markers = self.find_markers(&answer);
        for (i, marker) in markers.iter().enumerate() {
            let rest = &answer[marker.content_start..];
            let mut end = rest.find('\n').unwrap_or(rest.len());
            if let Some(next) = markers.get(i + 1) {
                end = end.min(next.start.saturating_sub(marker.content_start));
            }

            let items = rest[..end]
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string);

            if let Some(texts) = result.get_mut(&self.entity_types[marker.type_index]) {
                texts.extend(items);
            }
        }

        result
    }

    /// Locate `TYPE:` markers at word starts, ordered by position
    fn find_markers(&self, answer: &str) -> Vec<Marker> {
        let mut markers = Vec::new();

        for (type_index, entity_type) in self.entity_types.iter().enumerate() {
            let pattern = format!("{}:", entity_type);
            for (start, _) in answer.match_indices(&pattern) {
                let at_word_start = answer[..start]
                    .chars()
                    .next_back()
                    .map_or(true, char::is_whitespace);
                if at_word_start {
                    markers.push(Marker {
                        start,
                        content_start: start + pattern.len(),
                        type_index,
                    });
                }
            }
        }

        markers.sort_by_key(|m| m.start);
        markers
    }
}

#[derive(Clone, Copy, Debug)]
struct Marker {
    start: usize,
    content_start: usize,
    type_index: usize,
}

fn strip_residue(text: &str) -> String {
    let mut cleaned = text.to_string();
    for token in RESIDUE {
        if cleaned.contains(token) {
            cleaned = cleaned.replace(token, "");
        }
    }
    cleaned
}

/// Extract typed entities from a generated text
///
/// Convenience wrapper over [`AnswerParser`].
pub fn extract_classes<S: AsRef<str>>(
    generated: &str,
    entity_types: &[S],
    separator: &str,
) -> BTreeMap<String, Vec<String>> {
    AnswerParser::new(separator, entity_types).parse(generated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_answer() {
        let generated = "### Задание: x\n### Вход: y\n### Ответ: Drugname: аспирин, нурофен\nDI: \nADR: тошнота\n";
        let parsed = extract_classes(generated, &["Drugname", "DI", "ADR"], "Ответ: ");

        assert_eq!(parsed["Drugname"], vec!["аспирин", "нурофен"]);
        assert!(parsed["DI"].is_empty());
        assert_eq!(parsed["ADR"], vec!["тошнота"]);
    }

    #[test]
    fn test_parse_without_separator_uses_whole_text() {
        let parsed = extract_classes("PER: John\nLOC: Paris", &["PER", "LOC"], "Answer: ");
        assert_eq!(parsed["PER"], vec!["John"]);
        assert_eq!(parsed["LOC"], vec!["Paris"]);
    }

    #[test]
    fn test_marker_needs_word_start() {
        // "DI:" inside "ADI:" must not start a DI segment
        let parsed = extract_classes("Answer: ADI: x\nDI: y", &["DI"], "Answer: ");
        assert_eq!(parsed["DI"], vec!["y"]);
    }

    #[test]
    fn test_markers_on_one_line() {
        let parsed = extract_classes("Answer: PER: John, Mary LOC: Paris", &["PER", "LOC"], "Answer: ");
        assert_eq!(parsed["PER"], vec!["John", "Mary"]);
        assert_eq!(parsed["LOC"], vec!["Paris"]);
    }

    #[test]
    fn test_repeated_markers_accumulate() {
        let parsed = extract_classes("Answer: PER: John\nPER: Mary\n", &["PER"], "Answer: ");
        assert_eq!(parsed["PER"], vec!["John", "Mary"]);
    }

    #[test]
    fn test_residue_and_unknown_types_ignored() {
        let parsed = extract_classes("Answer: PER: John</s>\nFOO: bar", &["PER", "ORG"], "Answer: ");
        assert_eq!(parsed["PER"], vec!["John"]);
        assert!(parsed["ORG"].is_empty());
        assert!(!parsed.contains_key("FOO"));
    }

    #[test]
    fn test_last_separator_wins() {
        let generated = "Answer: PER: Wrong\n### Answer: PER: Right";
        let parsed = extract_classes(generated, &["PER"], "Answer: ");
        assert_eq!(parsed["PER"], vec!["Right"]);
    }
}
