//! Tokenized instruction datasets, padding and batching for training
//!
//! Every instruction becomes `[bos] source target [eos]`. With target-only
//! loss, the label of every source position is [`IGNORE_INDEX`], so only the
//! answer and the closing EOS contribute to the loss.

use crate::error::{Error, Result};
use crate::ner::Instruction;
use crate::traits::tokenizer::{SpecialTokens, TokenizerTrait};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Label value excluded from the loss
pub const IGNORE_INDEX: i64 = -100;

/// Length limits and masking mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationSettings {
    /// Source tokens kept, BOS excluded
    pub max_source_tokens_count: usize,

    /// Target tokens kept, EOS excluded
    pub max_target_tokens_count: usize,

    /// Mask source positions out of the loss
    pub only_target_loss: bool,
}

impl TokenizationSettings {
    /// Longest possible tokenized record
    pub fn max_length(&self) -> usize {
        self.max_source_tokens_count + self.max_target_tokens_count + 2
    }
}

/// One tokenized training record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenizedInstruction {
    /// Source instruction id
    pub id: String,

    /// Token ids
    pub input_ids: Vec<u32>,

    /// Per-position labels, [`IGNORE_INDEX`] where masked
    pub labels: Vec<i64>,

    /// 1 for real tokens
    pub attention_mask: Vec<u32>,
}

impl TokenizedInstruction {
    /// Tokenize an instruction and build its labels
    pub fn from_instruction<T: TokenizerTrait + ?Sized>(
        instruction: &Instruction,
        tokenizer: &T,
        settings: &TokenizationSettings,
        special: &SpecialTokens,
    ) -> Result<Self> {
        let mut source_ids = Vec::with_capacity(settings.max_source_tokens_count + 1);
        if let Some(bos) = special.bos {
            source_ids.push(bos);
        }
        let mut encoded_source = tokenizer.encode(&instruction.source, false)?;
        encoded_source.truncate(settings.max_source_tokens_count);
        source_ids.extend(encoded_source);

        let mut target_ids = tokenizer.encode(&instruction.output, false)?;
        target_ids.truncate(settings.max_target_tokens_count);

        let source_len = source_ids.len();
        let mut input_ids = source_ids;
        input_ids.extend(target_ids);
        input_ids.push(special.eos);

        let mut labels: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        if settings.only_target_loss {
            for label in labels.iter_mut().take(source_len) {
                *label = IGNORE_INDEX;
            }
        }
        let attention_mask = vec![1; input_ids.len()];

        Ok(Self {
            id: instruction.id.clone(),
            input_ids,
            labels,
            attention_mask,
        })
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Check if the record is empty
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of positions excluded from the loss
    pub fn num_masked(&self) -> usize {
        self.labels.iter().filter(|&&l| l == IGNORE_INDEX).count()
    }
}

/// A tokenized instruction dataset
#[derive(Clone, Debug, Default)]
pub struct InstructDataset {
    records: Vec<TokenizedInstruction>,
}

impl InstructDataset {
    /// Tokenize a list of instructions
    pub fn new<T: TokenizerTrait + ?Sized>(
        instructions: &[Instruction],
        tokenizer: &T,
        settings: &TokenizationSettings,
        special: &SpecialTokens,
    ) -> Result<Self> {
        let records = instructions
            .iter()
            .map(|instruction| TokenizedInstruction::from_instruction(instruction, tokenizer, settings, special))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { records })
    }

    /// Wrap already tokenized records
    pub fn from_records(records: Vec<TokenizedInstruction>) -> Self {
        Self { records }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get a record
    pub fn get(&self, index: usize) -> Option<&TokenizedInstruction> {
        self.records.get(index)
    }

    /// Iterate over records
    pub fn iter(&self) -> impl Iterator<Item = &TokenizedInstruction> {
        self.records.iter()
    }

    /// Total number of supervised (unmasked) label positions
    pub fn num_supervised_tokens(&self) -> usize {
        self.records.iter().map(|r| r.len() - r.num_masked()).sum()
    }
}

/// A padded batch in row-major layout
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataBatch {
    /// `batch_size * seq_len` token ids
    pub input_ids: Vec<u32>,

    /// `batch_size * seq_len` labels
    pub labels: Vec<i64>,

    /// `batch_size * seq_len` mask values
    pub attention_mask: Vec<u32>,

    /// Number of rows
    pub batch_size: usize,

    /// Padded row length
    pub seq_len: usize,

    /// Ids of the records in the batch
    pub example_ids: Vec<String>,
}

impl DataBatch {
    /// Get batch size
    pub fn len(&self) -> usize {
        self.batch_size
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.batch_size == 0
    }

    /// Labels that count toward the loss
    pub fn num_supervised(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }
}

/// Right-padding collator for causal LM batches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataCollator {
    /// Id used for padded input positions
    pub pad_token_id: u32,

    /// Round the padded length up to a multiple of this
    pub pad_to_multiple_of: Option<usize>,
}

impl DataCollator {
    /// Create a collator padding to a multiple of 8
    pub fn new(pad_token_id: u32) -> Self {
        Self {
            pad_token_id,
            pad_to_multiple_of: Some(8),
        }
    }

    /// Set padding multiple
    pub fn with_pad_to_multiple_of(mut self, multiple: Option<usize>) -> Self {
        self.pad_to_multiple_of = multiple.filter(|&m| m > 0);
        self
    }

    /// Pad records into one batch
    pub fn collate(&self, records: &[&TokenizedInstruction]) -> Result<DataBatch> {
        if records.is_empty() {
            return Err(Error::Validation("cannot collate an empty batch".to_string()));
        }

        let longest = records.iter().map(|r| r.len()).max().unwrap_or(0);
        let seq_len = match self.pad_to_multiple_of {
            Some(m) => longest.div_ceil(m) * m,
            None => longest,
        };

        let mut batch = DataBatch {
            input_ids: Vec::with_capacity(records.len() * seq_len),
            labels: Vec::with_capacity(records.len() * seq_len),
            attention_mask: Vec::with_capacity(records.len() * seq_len),
            batch_size: records.len(),
            seq_len,
            example_ids: Vec::with_capacity(records.len()),
        };

        for record in records {
            let padding = seq_len - record.len();
            batch.input_ids.extend(&record.input_ids);
            batch.input_ids.extend(std::iter::repeat(self.pad_token_id).take(padding));
            batch.labels.extend(&record.labels);
            batch.labels.extend(std::iter::repeat(IGNORE_INDEX).take(padding));
            batch.attention_mask.extend(&record.attention_mask);
            batch.attention_mask.extend(std::iter::repeat(0).take(padding));
            batch.example_ids.push(record.id.clone());
        }

        Ok(batch)
    }
}

/// Batch iterator over an [`InstructDataset`]
///
/// With shuffling on, each epoch uses its own permutation derived from the
/// seed, so a run is reproducible.
#[derive(Clone, Debug)]
pub struct DataLoader<'a> {
    dataset: &'a InstructDataset,
    collator: DataCollator,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    order: Vec<usize>,
    position: usize,
    epoch: usize,
}

impl<'a> DataLoader<'a> {
    /// Create a new data loader
    pub fn new(dataset: &'a InstructDataset, collator: DataCollator, batch_size: usize) -> Self {
        Self {
            dataset,
            collator,
            batch_size: batch_size.max(1),
            shuffle: false,
            seed: 0,
            order: (0..dataset.len()).collect(),
            position: 0,
            epoch: 0,
        }
    }

    /// Shuffle with a seed at every epoch
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self.reorder();
        self
    }

    fn reorder(&mut self) {
        self.order = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch as u64));
            self.order.shuffle(&mut rng);
        }
    }

    /// Get the next batch
    pub fn next_batch(&mut self) -> Option<Result<DataBatch>> {
        if self.position >= self.order.len() {
            return None;
        }

        let end = (self.position + self.batch_size).min(self.order.len());
        let records: Vec<&TokenizedInstruction> = self.order[self.position..end]
            .iter()
            .filter_map(|&i| self.dataset.get(i))
            .collect();
        self.position = end;

        Some(self.collator.collate(&records))
    }

    /// Reset for next epoch
    pub fn reset(&mut self) {
        self.position = 0;
        self.epoch += 1;
        self.reorder();
    }

    /// Get total number of batches
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Get current epoch
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Check if iteration is complete
    pub fn is_finished(&self) -> bool {
        self.position >= self.order.len()
    }
}
