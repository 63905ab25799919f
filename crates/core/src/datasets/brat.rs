//! Brat standoff reader (NEREL-BIO)
//!
//! A corpus directory holds `name.txt` / `name.ann` pairs. Only text-bound
//! annotations (`T` lines) are read; relations, events and notes are skipped.
//! Brat offsets count characters, so they are converted to byte offsets
//! before any slicing.

use crate::datasets::{truncate, CorpusProfile, DatasetName, DatasetOptions};
use crate::error::{Error, Result};
use crate::ner::{Entity, Instruction, InstructionFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A document with its entity spans in byte offsets
#[derive(Clone, Debug)]
pub struct BratDocument {
    /// File stem
    pub id: String,

    /// Raw text
    pub text: String,

    /// Entity spans
    pub entities: Vec<Entity>,
}

/// Parse text-bound annotations from `.ann` content
///
/// Offsets in the result are still character offsets. Discontinuous spans
/// (`0 5;9 12`) take their outer bounds.
pub fn parse_annotations(content: &str) -> Result<Vec<Entity>> {
    let mut entities = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if !line.starts_with('T') {
            continue;
        }
        let mut columns = line.splitn(3, '\t');
        let (_id, spec, text) = match (columns.next(), columns.next(), columns.next()) {
            (Some(id), Some(spec), Some(text)) => (id, spec, text),
            _ => {
                return Err(Error::Dataset(format!(
                    "malformed annotation on line {}: {}",
                    line_no + 1,
                    line
                )))
            }
        };

        let (label, ranges) = spec.split_once(' ').ok_or_else(|| {
            Error::Dataset(format!("annotation without span on line {}", line_no + 1))
        })?;

        let mut start = usize::MAX;
        let mut end = 0;
        for range in ranges.split(';') {
            let (s, e) = range
                .trim()
                .split_once(' ')
                .ok_or_else(|| Error::Dataset(format!("bad span '{}' on line {}", range, line_no + 1)))?;
            let s: usize = s
                .parse()
                .map_err(|_| Error::Dataset(format!("bad offset '{}' on line {}", s, line_no + 1)))?;
            let e: usize = e
                .parse()
                .map_err(|_| Error::Dataset(format!("bad offset '{}' on line {}", e, line_no + 1)))?;
            start = start.min(s);
            end = end.max(e);
        }

        entities.push(Entity::new(text.trim(), label, start, end));
    }

    Ok(entities)
}

/// Convert character offsets to byte offsets
fn char_to_byte_offsets(text: &str, entities: Vec<Entity>) -> Vec<Entity> {
    let mut boundaries: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    boundaries.push(text.len());

    entities
        .into_iter()
        .filter_map(|mut entity| {
            let start = *boundaries.get(entity.start)?;
            let end = *boundaries.get(entity.end)?;
            entity.start = start;
            entity.end = end;
            Some(entity)
        })
        .collect()
}

/// Read one `.txt` file and its `.ann` companion
pub fn read_document(txt_path: &Path) -> Result<BratDocument> {
    let text = std::fs::read_to_string(txt_path)?;
    let ann_path = txt_path.with_extension("ann");
    let entities = if ann_path.is_file() {
        parse_annotations(&std::fs::read_to_string(&ann_path)?)?
    } else {
        warn!(path = %ann_path.display(), "missing annotation file, treating document as unannotated");
        Vec::new()
    };

    let id = txt_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let entities = char_to_byte_offsets(&text, entities);

    Ok(BratDocument { id, text, entities })
}

/// Read all documents in a directory, ordered by file name
pub fn read_directory(dir: &Path) -> Result<Vec<BratDocument>> {
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("brat directory {}", dir.display())));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "txt"))
        .collect();
    paths.sort();

    debug!(dir = %dir.display(), documents = paths.len(), "reading brat directory");
    paths.iter().map(|p| read_document(p)).collect()
}

/// Split a text into `n` runs of whole lines with near-equal line counts
///
/// Returns `(byte_offset, chunk)` pairs. Chunks never split a line.
pub fn split_text(text: &str, n: usize) -> Vec<(usize, &str)> {
    let mut line_starts = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        line_starts.push(offset);
        offset += line.len();
    }

    let num_lines = line_starts.len();
    if n <= 1 || num_lines <= 1 {
        return vec![(0, text)];
    }

    let n = n.min(num_lines);
    (0..n)
        .map(|i| {
            let first = i * num_lines / n;
            let last = (i + 1) * num_lines / n;
            let start = line_starts[first];
            let end = line_starts.get(last).copied().unwrap_or(text.len());
            (start, &text[start..end])
        })
        .collect()
}

/// Turn a document into one instruction per chunk
pub fn document_instructions(
    document: &BratDocument,
    text_n_splits: Option<usize>,
    format: &InstructionFormat<'_>,
) -> Vec<Instruction> {
    let chunks = split_text(&document.text, text_n_splits.unwrap_or(1));
    let single = chunks.len() == 1;

    chunks
        .into_iter()
        .enumerate()
        .filter(|(_, (_, chunk))| !chunk.trim().is_empty())
        .map(|(i, (offset, chunk))| {
            let chunk_end = offset + chunk.len();
            let entities: Vec<Entity> = document
                .entities
                .iter()
                .filter(|e| e.start >= offset && e.end <= chunk_end)
                .map(|e| e.rebased(offset))
                .collect();
            let id = if single {
                document.id.clone()
            } else {
                format!("{}_{}", document.id, i)
            };
            format.build_from_spans(id, chunk.trim(), &entities)
        })
        .collect()
}

/// Build instructions for every document under `dir`
pub fn create_instruct_dataset(dir: &Path, options: &DatasetOptions) -> Result<Vec<Instruction>> {
    let profile = CorpusProfile::new(DatasetName::NerelBio, false);
    let format = profile.format(options.output_format);
    let documents = read_directory(dir)?;

    let instructions = documents
        .iter()
        .flat_map(|doc| document_instructions(doc, options.text_n_splits, &format))
        .collect();
    Ok(truncate(instructions, options.max_instances))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ner::{OutputFormat, PromptTemplate};

    #[test]
    fn test_parse_annotations() {
        let ann = "T1\tDISO 0 5\tболит\nR1\tCAUSE Arg1:T1 Arg2:T2\nT2\tCHEM 6 10;12 15\tfoo bar\n#1\tNote T1\tx\n";
        let entities = parse_annotations(ann).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].label, "DISO");
        assert_eq!(entities[1].span(), (6, 15));
        assert_eq!(entities[1].text, "foo bar");
    }

    #[test]
    fn test_malformed_annotation() {
        assert!(parse_annotations("T1\tDISO 0 x\tfoo\n").is_err());
        assert!(parse_annotations("T1 DISO 0 5 foo\n").is_err());
    }

    #[test]
    fn test_char_offsets_become_byte_offsets() {
        let text = "Аспирин и вода";
        let entities = char_to_byte_offsets(text, vec![Entity::new("вода", "CHEM", 10, 14)]);
        assert!(entities[0].validate(text));
    }

    #[test]
    fn test_split_text_keeps_lines_whole() {
        let text = "a\nb\nc\nd\ne\n";
        let chunks = split_text(text, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], (0, "a\nb\n"));
        assert_eq!(chunks[1], (4, "c\nd\ne\n"));

        let joined: String = chunks.iter().map(|(_, c)| *c).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_split_text_more_splits_than_lines() {
        assert_eq!(split_text("one\ntwo", 5).len(), 2);
        assert_eq!(split_text("single line", 3), vec![(0, "single line")]);
    }

    #[test]
    fn test_document_instructions_assign_entities_to_chunks() {
        let text = "Anna lives here\nBob works there\n".to_string();
        let document = BratDocument {
            id: "doc".to_string(),
            entities: vec![
                Entity::new("Anna", "PERSON", 0, 4),
                Entity::new("Bob", "PERSON", 16, 19),
            ],
            text,
        };
        let format = InstructionFormat {
            instruction: "find",
            entity_types: &["PERSON"],
            template: PromptTemplate::russian(),
            output: OutputFormat::Short,
        };

        let whole = document_instructions(&document, None, &format);
        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].id, "doc");
        assert_eq!(whole[0].raw_entities["PERSON"], vec!["Anna", "Bob"]);

        let split = document_instructions(&document, Some(2), &format);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].id, "doc_0");
        assert_eq!(split[0].raw_entities["PERSON"], vec!["Anna"]);
        assert_eq!(split[1].input, "Bob works there");
        assert_eq!(split[1].raw_entities["PERSON"], vec!["Bob"]);
    }

    #[test]
    fn test_create_instruct_dataset_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "Рак лечат химиотерапией").unwrap();
        std::fs::write(dir.path().join("b.ann"), "T1\tDISO 0 3\tРак\nT2\tMEDPROC 10 23\tхимиотерапией\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "Пусто").unwrap();

        let instructions = create_instruct_dataset(dir.path(), &DatasetOptions::new(dir.path())).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].id, "a");
        assert_eq!(instructions[1].raw_entities["DISO"], vec!["Рак"]);
        assert_eq!(instructions[1].raw_entities["MEDPROC"], vec!["химиотерапией"]);
    }

    #[test]
    fn test_missing_directory() {
        let err = read_directory(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
