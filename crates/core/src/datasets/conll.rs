//! CoNLL column format reader (CoNLL-2003)
//!
//! Sentences are separated by blank lines; each token line holds the token
//! in the first column and its IOB tag in the last one. The tag decoder
//! accepts both IOB1 and IOB2.

use crate::datasets::{resolve_split_file, truncate, CorpusProfile, DatasetName, DatasetOptions, Split};
use crate::error::Result;
use crate::ner::{Entity, Instruction};

/// A tokenized sentence with per-token tags
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaggedSentence {
    /// Identifier from a `# id` header, when present
    pub id: Option<String>,

    /// Tokens
    pub tokens: Vec<String>,

    /// IOB tags, one per token
    pub tags: Vec<String>,
}

impl TaggedSentence {
    /// Tokens joined by single spaces
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }

    /// Decode tag spans into entities over [`TaggedSentence::text`]
    pub fn entities(&self) -> Vec<Entity> {
        decode_iob(&self.tokens, &self.tags)
    }
}

/// Parse CoNLL-formatted content
///
/// `-DOCSTART-` lines are skipped. Lines starting with `# id` set the id of
/// the following sentence.
pub fn parse_conll(content: &str) -> Vec<TaggedSentence> {
    let mut sentences = Vec::new();
    let mut current = TaggedSentence::default();

    let flush = |current: &mut TaggedSentence, sentences: &mut Vec<TaggedSentence>| {
        if !current.tokens.is_empty() {
            sentences.push(std::mem::take(current));
        }
    };

    for line in content.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            flush(&mut current, &mut sentences);
            continue;
        }
        if line.starts_with("-DOCSTART-") {
            flush(&mut current, &mut sentences);
            continue;
        }
        if let Some(header) = line.strip_prefix("# id") {
            flush(&mut current, &mut sentences);
            current.id = header.split_whitespace().next().map(str::to_string);
            continue;
        }

        let mut columns = line.split_whitespace();
        let token = match columns.next() {
            Some(token) => token,
            None => continue,
        };
        let tag = columns.last().unwrap_or("O");
        current.tokens.push(token.to_string());
        current.tags.push(tag.to_string());
    }
    flush(&mut current, &mut sentences);

    sentences
}

/// Decode IOB1/IOB2 tags into entity spans
///
/// Offsets refer to the tokens joined by single spaces. An `I-X` tag that
/// does not continue an `X` entity starts a new one.
pub fn decode_iob(tokens: &[String], tags: &[String]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut open: Option<(String, usize, usize)> = None;
    let mut offset = 0;
    let mut spans = Vec::with_capacity(tokens.len());

    for token in tokens {
        spans.push((offset, offset + token.len()));
        offset += token.len() + 1;
    }
    let text = tokens.join(" ");

    let close = |open: &mut Option<(String, usize, usize)>, entities: &mut Vec<Entity>| {
        if let Some((label, start, end)) = open.take() {
            entities.push(Entity::new(&text[start..end], label, start, end));
        }
    };

    for ((tag, _), (start, end)) in tags.iter().zip(tokens).zip(spans) {
        let (prefix, label) = match tag.split_once('-') {
            Some((prefix, label)) => (prefix, label),
            None => {
                close(&mut open, &mut entities);
                continue;
            }
        };

        let continues = prefix == "I" && open.as_ref().map_or(false, |(l, _, _)| l == label);
        if continues {
            if let Some(current) = open.as_mut() {
                current.2 = end;
            }
        } else {
            close(&mut open, &mut entities);
            open = Some((label.to_string(), start, end));
        }
    }
    close(&mut open, &mut entities);

    entities
}

fn split_file_names(split: Split) -> &'static [&'static str] {
    match split {
        Split::Train => &["train.txt", "train.conll"],
        Split::Validation => &["valid.txt", "validation.txt", "dev.txt"],
        Split::Test => &["test.txt", "test.conll"],
    }
}

/// Build instructions for one CoNLL-2003 split
pub fn create_instruct_dataset(options: &DatasetOptions, split: Split) -> Result<Vec<Instruction>> {
    let path = resolve_split_file(&options.data_path, split_file_names(split))?;
    let sentences = parse_conll(&std::fs::read_to_string(&path)?);

    let profile = CorpusProfile::new(DatasetName::Conll2003, false);
    let format = profile.format(options.output_format);
    let instructions = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let id = format!("{}_{}", split.as_str(), i);
            format.build_from_spans(id, sentence.text(), &sentence.entities())
        })
        .collect();

    Ok(truncate(instructions, options.max_instances))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const SAMPLE: &str = "-DOCSTART- -X- -X- O\n\nEU NNP B-NP B-ORG\nrejects VBZ B-VP O\nGerman JJ B-NP B-MISC\ncall NN I-NP O\n\nPeter NNP B-NP B-PER\nBlackburn NNP I-NP I-PER\n";

    #[test]
    fn test_parse_conll() {
        let sentences = parse_conll(SAMPLE);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text(), "EU rejects German call");
        assert_eq!(sentences[1].tags, strings(&["B-PER", "I-PER"]));
    }

    #[test]
    fn test_decode_iob2() {
        let sentences = parse_conll(SAMPLE);
        let entities = sentences[0].entities();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].text, "EU");
        assert_eq!(entities[1].text, "German");
        assert_eq!(sentences[1].entities()[0].text, "Peter Blackburn");
    }

    #[test]
    fn test_decode_iob1_and_type_switch() {
        let tokens = strings(&["New", "York", "Times", "Mets"]);
        let tags = strings(&["I-LOC", "I-LOC", "I-ORG", "B-ORG"]);
        let entities = decode_iob(&tokens, &tags);

        let texts: Vec<_> = entities.iter().map(|e| (e.text.as_str(), e.label.as_str())).collect();
        assert_eq!(texts, vec![("New York", "LOC"), ("Times", "ORG"), ("Mets", "ORG")]);
        let text = tokens.join(" ");
        assert!(entities.iter().all(|e| e.validate(&text)));
    }

    #[test]
    fn test_create_instruct_dataset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("valid.txt"), SAMPLE).unwrap();

        let options = DatasetOptions::new(dir.path());
        let instructions = create_instruct_dataset(&options, Split::Validation).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].id, "validation_0");
        assert_eq!(instructions[0].output, "PER: \nORG: EU\nLOC: \nMISC: German\n");
        assert!(instructions[0].source.starts_with("### Task: "));

        assert!(create_instruct_dataset(&options, Split::Train).is_err());
    }
}
