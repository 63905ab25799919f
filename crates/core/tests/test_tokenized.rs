//! Tokenized datasets built from real corpus records

mod common;

use instruct_ner_core::datasets::{load_train_eval, DatasetName, DatasetOptions};
use instruct_ner_core::training::{DataCollator, DataLoader, InstructDataset, TokenizationSettings, IGNORE_INDEX};
use instruct_ner_core::traits::{TokenizerTrait, WhitespaceTokenizer};

#[test]
fn test_target_only_loss_covers_answer() {
    let dir = tempfile::tempdir().unwrap();
    common::write_conll(dir.path());
    let (train, _) = load_train_eval(DatasetName::Conll2003, &DatasetOptions::new(dir.path())).unwrap();

    let tokenizer = WhitespaceTokenizer::new();
    let settings = TokenizationSettings {
        max_source_tokens_count: 256,
        max_target_tokens_count: 64,
        only_target_loss: true,
    };
    let dataset = InstructDataset::new(&train, &tokenizer, &settings, &tokenizer.special_tokens()).unwrap();
    assert_eq!(dataset.len(), train.len());

    for (record, instruction) in dataset.iter().zip(&train) {
        let source_len = tokenizer.token_count(&instruction.source).unwrap() + 1;
        assert_eq!(record.num_masked(), source_len);
        assert!(record.len() <= settings.max_length());

        let supervised: Vec<u32> = record
            .labels
            .iter()
            .filter(|&&l| l != IGNORE_INDEX)
            .map(|&l| l as u32)
            .collect();
        assert_eq!(tokenizer.decode(&supervised, true).unwrap(), instruction.output.split_whitespace().collect::<Vec<_>>().join(" "));
    }
}

#[test]
fn test_loader_batches_are_padded() {
    let dir = tempfile::tempdir().unwrap();
    common::write_conll(dir.path());
    let (train, _) = load_train_eval(DatasetName::Conll2003, &DatasetOptions::new(dir.path())).unwrap();

    let tokenizer = WhitespaceTokenizer::new();
    let settings = TokenizationSettings {
        max_source_tokens_count: 256,
        max_target_tokens_count: 64,
        only_target_loss: true,
    };
    let dataset = InstructDataset::new(&train, &tokenizer, &settings, &tokenizer.special_tokens()).unwrap();
    let mut loader = DataLoader::new(&dataset, DataCollator::new(0), 2).with_shuffle(42);

    let mut rows = 0;
    while let Some(batch) = loader.next_batch() {
        let batch = batch.unwrap();
        assert_eq!(batch.seq_len % 8, 0);
        assert_eq!(batch.input_ids.len(), batch.batch_size * batch.seq_len);
        for row in 0..batch.batch_size {
            let mask = &batch.attention_mask[row * batch.seq_len..(row + 1) * batch.seq_len];
            let labels = &batch.labels[row * batch.seq_len..(row + 1) * batch.seq_len];
            for (m, l) in mask.iter().zip(labels) {
                if *m == 0 {
                    assert_eq!(*l, IGNORE_INDEX);
                }
            }
        }
        rows += batch.batch_size;
    }
    assert_eq!(rows, 3);
}
