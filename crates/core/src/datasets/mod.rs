//! Corpus readers that turn annotated NER data into instructions
//!
//! Each supported corpus is addressed by a [`DatasetName`]. The two entry
//! points, [`load_train_eval`] and [`load_test`], pick the right reader and
//! split layout for that corpus.

pub mod brat;
pub mod conll;
pub mod multiconer;
pub mod nerel;
pub mod rudrec;
pub mod tags;

use crate::error::{Error, Result};
use crate::ner::{Instruction, InstructionFormat, OutputFormat, PromptTemplate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tags::*;
use tracing::info;

/// Supported corpora
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatasetName {
    /// RuDReC drug reviews
    Rudrec,

    /// NEREL, from pre-built instruction files
    Nerel,

    /// NEREL-BIO, from brat standoff files
    NerelBio,

    /// CoNLL-2003
    Conll2003,

    /// MultiCoNER II
    Multiconer2023,
}

impl DatasetName {
    /// All corpora
    pub const ALL: [DatasetName; 5] = [
        Self::Rudrec,
        Self::Nerel,
        Self::NerelBio,
        Self::Conll2003,
        Self::Multiconer2023,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rudrec => "rudrec",
            Self::Nerel => "nerel",
            Self::NerelBio => "nerel_bio",
            Self::Conll2003 => "conll2003",
            Self::Multiconer2023 => "multiconer2023",
        }
    }

    /// Entity types in answer order
    ///
    /// `coarse` only affects MultiCoNER.
    pub fn entity_types(&self, coarse: bool) -> &'static [&'static str] {
        match self {
            Self::Rudrec => RUDREC_ENTITY_TYPES,
            Self::Nerel => NEREL_ENTITY_TYPES,
            Self::NerelBio => NEREL_BIO_ENTITY_TYPES,
            Self::Conll2003 => CONLL2003_ENTITY_TYPES,
            Self::Multiconer2023 if coarse => MULTICONER_COARSE_ENTITY_TYPES,
            Self::Multiconer2023 => MULTICONER_ENTITY_TYPES,
        }
    }

    /// Prompt template used by this corpus
    pub fn template(&self) -> PromptTemplate {
        match self {
            Self::Rudrec | Self::Nerel | Self::NerelBio => PromptTemplate::russian(),
            Self::Conll2003 | Self::Multiconer2023 => PromptTemplate::english(),
        }
    }

    /// Task description shown to the model
    pub fn instruction_text(&self, coarse: bool) -> String {
        let types = self.entity_types(coarse);
        match self {
            Self::Rudrec => russian_instruction("отзыва о лекарстве", types),
            Self::Nerel => russian_instruction("текста", types),
            Self::NerelBio => russian_instruction("биомедицинского текста", types),
            Self::Conll2003 | Self::Multiconer2023 => english_instruction(types),
        }
    }
}

impl FromStr for DatasetName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == normalized)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "unknown dataset '{}', expected one of: {}",
                    s,
                    Self::ALL.map(|n| n.as_str()).join(", ")
                ))
            })
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dataset split
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    /// Training records
    Train,
    /// Held-out records used for evaluation during training
    Validation,
    /// Records used for prediction
    Test,
}

impl Split {
    /// Split name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

/// Options shared by all corpus readers
#[derive(Clone, Debug)]
pub struct DatasetOptions {
    /// File or directory holding the corpus
    pub data_path: PathBuf,

    /// Keep at most this many instructions per split
    pub max_instances: Option<usize>,

    /// Split long documents into this many chunks (brat corpora)
    pub text_n_splits: Option<usize>,

    /// Fraction of records held out when a corpus has no test split
    pub test_size: f64,

    /// Seed for shuffling
    pub seed: u64,

    /// Use the coarse MultiCoNER tagset
    pub coarse_tagset: bool,

    /// Answer layout
    pub output_format: OutputFormat,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/rudrec/rudrec_annotated.json"),
            max_instances: None,
            text_n_splits: None,
            test_size: 0.3,
            seed: 42,
            coarse_tagset: false,
            output_format: OutputFormat::Short,
        }
    }
}

impl DatasetOptions {
    /// Create options for a data path
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    /// Set the instance limit
    pub fn with_max_instances(mut self, max_instances: Option<usize>) -> Self {
        self.max_instances = max_instances;
        self
    }

    /// Set the number of text chunks per document
    pub fn with_text_n_splits(mut self, n: Option<usize>) -> Self {
        self.text_n_splits = n;
        self
    }

    /// Set the held-out fraction
    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size.clamp(0.0, 1.0);
        self
    }

    /// Set the shuffle seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Use the coarse MultiCoNER tagset
    pub fn with_coarse_tagset(mut self, coarse: bool) -> Self {
        self.coarse_tagset = coarse;
        self
    }

    /// Set the answer layout
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }
}

/// Owned task description plus tagset for a corpus
#[derive(Clone, Debug)]
pub struct CorpusProfile {
    /// Task description
    pub instruction: String,

    /// Entity types in answer order
    pub entity_types: &'static [&'static str],

    /// Prompt template
    pub template: PromptTemplate,
}

impl CorpusProfile {
    /// Profile for a corpus
    pub fn new(name: DatasetName, coarse: bool) -> Self {
        Self {
            instruction: name.instruction_text(coarse),
            entity_types: name.entity_types(coarse),
            template: name.template(),
        }
    }

    /// Borrow as an instruction format
    pub fn format(&self, output: OutputFormat) -> InstructionFormat<'_> {
        InstructionFormat {
            instruction: &self.instruction,
            entity_types: self.entity_types,
            template: self.template.clone(),
            output,
        }
    }
}

/// Load the training and evaluation instructions for a corpus
pub fn load_train_eval(
    name: DatasetName,
    options: &DatasetOptions,
) -> Result<(Vec<Instruction>, Vec<Instruction>)> {
    let (train, eval) = match name {
        DatasetName::Rudrec => rudrec::create_train_test_instruct_datasets(options)?,
        DatasetName::Nerel => (
            nerel::load_split(options, Split::Train)?,
            nerel::load_split(options, Split::Validation)?,
        ),
        DatasetName::NerelBio => (
            brat::create_instruct_dataset(&options.data_path.join("train"), options)?,
            brat::create_instruct_dataset(&options.data_path.join("dev"), options)?,
        ),
        DatasetName::Conll2003 => (
            conll::create_instruct_dataset(options, Split::Train)?,
            conll::create_instruct_dataset(options, Split::Validation)?,
        ),
        DatasetName::Multiconer2023 => (
            multiconer::create_instruct_dataset(options, Split::Train, false)?,
            multiconer::create_instruct_dataset(options, Split::Validation, false)?,
        ),
    };

    info!(
        dataset = %name,
        train = train.len(),
        eval = eval.len(),
        "loaded instruction datasets"
    );
    Ok((train, eval))
}

/// Load the test instructions for a corpus
pub fn load_test(name: DatasetName, options: &DatasetOptions) -> Result<Vec<Instruction>> {
    let test = match name {
        DatasetName::Rudrec => {
            // RuDReC has no test split of its own: reuse the held-out part
            let unlimited = DatasetOptions {
                max_instances: None,
                ..options.clone()
            };
            let (_, test) = rudrec::create_train_test_instruct_datasets(&unlimited)?;
            truncate(test, options.max_instances)
        }
        DatasetName::Nerel => nerel::load_split(options, Split::Test)?,
        DatasetName::NerelBio => brat::create_instruct_dataset(&options.data_path.join("test"), options)?,
        DatasetName::Conll2003 => conll::create_instruct_dataset(options, Split::Test)?,
        DatasetName::Multiconer2023 => multiconer::create_instruct_dataset(options, Split::Test, true)?,
    };

    info!(dataset = %name, test = test.len(), "loaded test instructions");
    Ok(test)
}

/// Keep at most `max_instances` items
pub fn truncate<T>(mut items: Vec<T>, max_instances: Option<usize>) -> Vec<T> {
    if let Some(max) = max_instances {
        items.truncate(max);
    }
    items
}

/// Shuffle items with a seeded RNG
pub fn shuffle_seeded<T>(items: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
}

/// Seeded random train/test split
///
/// The test part holds `ceil(test_size * n)` items.
pub fn train_test_split<T>(mut items: Vec<T>, test_size: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let n_test = ((items.len() as f64) * test_size.clamp(0.0, 1.0)).ceil() as usize;
    shuffle_seeded(&mut items, seed);
    let train = items.split_off(n_test.min(items.len()));
    (train, items)
}

/// First existing file among candidate names inside `dir`
pub(crate) fn resolve_split_file(dir: &Path, candidates: &[&str]) -> Result<PathBuf> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            Error::NotFound(format!(
                "none of [{}] found in {}",
                candidates.join(", "),
                dir.display()
            ))
        })
}
