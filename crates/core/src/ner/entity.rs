//! Entity spans read from annotated corpora

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An annotated entity span
///
/// Offsets are byte offsets into the text the entity was read from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity text
    pub text: String,

    /// Entity type label
    pub label: String,

    /// Start position in original text
    pub start: usize,

    /// End position in original text
    pub end: usize,
}

impl Entity {
    /// Create a new entity
    pub fn new(text: impl Into<String>, label: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
            start,
            end,
        }
    }

    /// Get the span as a tuple
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Get the length of the span
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if entity is empty
    pub fn is_empty(&self) -> bool {
        self.start >= self.end || self.text.is_empty()
    }

    /// Check that the span points at the entity text
    pub fn validate(&self, text: &str) -> bool {
        if self.start >= self.end || self.end > text.len() {
            return false;
        }
        text.get(self.start..self.end) == Some(self.text.as_str())
    }

    /// Shift the span left by `offset` bytes
    pub fn rebased(&self, offset: usize) -> Self {
        Self {
            text: self.text.clone(),
            label: self.label.clone(),
            start: self.start.saturating_sub(offset),
            end: self.end.saturating_sub(offset),
        }
    }
}

/// Group entity texts by label, keeping only the given types
///
/// Every type in `entity_types` gets a key, even if it has no entities.
/// Entity order within a type follows the input order.
pub fn group_entities<'a, I>(entities: I, entity_types: &[&str]) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = &'a Entity>,
{
    let mut grouped: BTreeMap<String, Vec<String>> = entity_types
        .iter()
        .map(|t| (t.to_string(), Vec::new()))
        .collect();

    for entity in entities {
        if let Some(texts) = grouped.get_mut(&entity.label) {
            texts.push(entity.text.clone());
        }
    }

    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_validate() {
        let text = "Aspirin helped with headache";
        assert!(Entity::new("Aspirin", "Drugname", 0, 7).validate(text));
        assert!(!Entity::new("Aspirin", "Drugname", 1, 8).validate(text));
        assert!(!Entity::new("Aspirin", "Drugname", 0, 99).validate(text));
    }

    #[test]
    fn test_entity_rebased() {
        let entity = Entity::new("Paris", "LOC", 20, 25).rebased(14);
        assert_eq!(entity.span(), (6, 11));
        assert_eq!(entity.len(), 5);
    }

    #[test]
    fn test_group_entities_keeps_all_types() {
        let entities = vec![
            Entity::new("John", "PER", 0, 4),
            Entity::new("Paris", "LOC", 14, 19),
            Entity::new("Mary", "PER", 24, 28),
            Entity::new("thing", "UNKNOWN", 30, 35),
        ];
        let grouped = group_entities(&entities, &["PER", "ORG", "LOC"]);

        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped["PER"], vec!["John", "Mary"]);
        assert!(grouped["ORG"].is_empty());
        assert_eq!(grouped["LOC"], vec!["Paris"]);
    }
}
