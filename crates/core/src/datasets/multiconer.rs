//! MultiCoNER II reader
//!
//! Files use the CoNLL layout with `# id <uuid> domain=<lang>` headers and
//! `token _ _ TAG` lines. Fine-grained tags may be folded into the six
//! coarse groups.

use crate::datasets::conll::{parse_conll, TaggedSentence};
use crate::datasets::tags::multiconer_coarse_type;
use crate::datasets::{resolve_split_file, shuffle_seeded, truncate, CorpusProfile, DatasetName, DatasetOptions, Split};
use crate::error::Result;
use crate::ner::{Entity, Instruction};

fn split_file_names(split: Split) -> &'static [&'static str] {
    match split {
        Split::Train => &["train.conll", "en_train.conll", "train.txt"],
        Split::Validation => &["dev.conll", "en_dev.conll", "validation.conll"],
        Split::Test => &["test.conll", "en_test.conll", "test.txt"],
    }
}

/// Entities of a sentence, optionally folded into coarse types
///
/// Fine tags without a coarse group are dropped when folding.
pub fn sentence_entities(sentence: &TaggedSentence, coarse: bool) -> Vec<Entity> {
    let entities = sentence.entities();
    if !coarse {
        return entities;
    }

    entities
        .into_iter()
        .filter_map(|mut entity| {
            let coarse_label = multiconer_coarse_type(&entity.label)?;
            entity.label = coarse_label.to_string();
            Some(entity)
        })
        .collect()
}

/// Build instructions for one MultiCoNER split
///
/// With `shuffle`, records are shuffled with the configured seed before
/// the instance limit is applied.
pub fn create_instruct_dataset(options: &DatasetOptions, split: Split, shuffle: bool) -> Result<Vec<Instruction>> {
    let path = resolve_split_file(&options.data_path, split_file_names(split))?;
    let sentences = parse_conll(&std::fs::read_to_string(&path)?);

    let profile = CorpusProfile::new(DatasetName::Multiconer2023, options.coarse_tagset);
    let format = profile.format(options.output_format);
    let mut instructions: Vec<Instruction> = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let id = sentence
                .id
                .clone()
                .unwrap_or_else(|| format!("{}_{}", split.as_str(), i));
            let entities = sentence_entities(sentence, options.coarse_tagset);
            format.build_from_spans(id, sentence.text(), &entities)
        })
        .collect();

    if shuffle {
        shuffle_seeded(&mut instructions, options.seed);
    }
    Ok(truncate(instructions, options.max_instances))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# id 1a2b domain=en\nrobert _ _ B-Artist\ngordon _ _ I-Artist\nsang _ _ O\nin _ _ O\nparis _ _ B-HumanSettlement\n\n# id 3c4d domain=en\naspirin _ _ B-Medication/Vaccine\nworks _ _ O\n";

    #[test]
    fn test_fine_tags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dev.conll"), SAMPLE).unwrap();

        let instructions = create_instruct_dataset(&DatasetOptions::new(dir.path()), Split::Validation, false).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].id, "1a2b");
        assert_eq!(instructions[0].input, "robert gordon sang in paris");
        assert_eq!(instructions[0].raw_entities["Artist"], vec!["robert gordon"]);
        assert_eq!(instructions[1].raw_entities["Medication/Vaccine"], vec!["aspirin"]);
    }

    #[test]
    fn test_coarse_tags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("train.conll"), SAMPLE).unwrap();

        let options = DatasetOptions::new(dir.path()).with_coarse_tagset(true);
        let instructions = create_instruct_dataset(&options, Split::Train, false).unwrap();
        assert_eq!(instructions[0].raw_entities.len(), 6);
        assert_eq!(instructions[0].raw_entities["Person"], vec!["robert gordon"]);
        assert_eq!(instructions[0].raw_entities["Location"], vec!["paris"]);
        assert_eq!(instructions[1].raw_entities["Medical"], vec!["aspirin"]);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::new();
        for i in 0..20 {
            content.push_str(&format!("# id s{} domain=en\nword{} _ _ O\n\n", i, i));
        }
        std::fs::write(dir.path().join("test.conll"), content).unwrap();

        let options = DatasetOptions::new(dir.path()).with_seed(7);
        let a = create_instruct_dataset(&options, Split::Test, true).unwrap();
        let b = create_instruct_dataset(&options, Split::Test, true).unwrap();
        let ids_a: Vec<_> = a.iter().map(|i| i.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(ids_a.len(), 20);

        let limited = create_instruct_dataset(&options.with_max_instances(Some(5)), Split::Test, true).unwrap();
        assert_eq!(limited.len(), 5);
        assert_eq!(limited[0].id, ids_a[0]);
    }
}
