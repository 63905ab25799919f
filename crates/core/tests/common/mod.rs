//! Common test utilities

#![allow(dead_code)]

use instruct_ner_core::datasets::DatasetOptions;
use std::path::Path;

pub const CONLL_TRAIN: &str = "-DOCSTART- -X- -X- O

EU NNP B-NP B-ORG
rejects VBZ B-VP O
German JJ B-NP B-MISC
call NN I-NP O
to TO B-VP O
boycott VB I-VP O
British JJ B-NP B-MISC
lamb NN I-NP O
. . O O

Peter NNP B-NP B-PER
Blackburn NNP I-NP I-PER

BRUSSELS NNP B-NP B-LOC
1996-08-22 CD I-NP O
";

pub const CONLL_VALID: &str = "-DOCSTART- -X- -X- O

CRICKET NNP B-NP O
- : O O
LEICESTERSHIRE NNP B-NP B-ORG
TAKE NNP I-NP O
OVER IN B-PP O
AT NNP B-NP O
TOP NNP I-NP O
";

pub const RUDREC_LINES: &str = r#"{"file_name": "a", "sentence_id": 0, "text": "Нурофен помог от головной боли", "entities": [{"entity_type": "Drugname", "entity_text": "Нурофен"}, {"entity_type": "DI", "entity_text": "головной боли"}]}
{"file_name": "a", "sentence_id": 1, "text": "После таблеток тошнота", "entities": [{"entity_type": "Drugform", "entity_text": "таблеток"}, {"entity_type": "ADR", "entity_text": "тошнота"}]}
{"file_name": "b", "sentence_id": 0, "text": "Антибиотики не помогли", "entities": [{"entity_type": "Drugclass", "entity_text": "Антибиотики"}]}
{"file_name": "b", "sentence_id": 1, "text": "Отзыв без лекарств", "entities": []}
"#;

/// Write the CoNLL-2003 fixture into `dir`
pub fn write_conll(dir: &Path) {
    std::fs::write(dir.join("train.txt"), CONLL_TRAIN).unwrap();
    std::fs::write(dir.join("valid.txt"), CONLL_VALID).unwrap();
    std::fs::write(dir.join("test.txt"), CONLL_VALID).unwrap();
}

/// Write the RuDReC fixture and return options pointing at it
pub fn rudrec_options(dir: &Path) -> DatasetOptions {
    let path = dir.join("rudrec_annotated.json");
    std::fs::write(&path, RUDREC_LINES).unwrap();
    DatasetOptions::new(path)
}
