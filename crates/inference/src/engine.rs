//! Batch prediction over instruction records

use crate::generator::Generator;
use crate::predictions::{PredictionRecord, PredictionTable};
use instruct_ner_core::config::GenerationConfig;
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::ner::{AnswerParser, Instruction};
use instruct_ner_core::traits::model::CausalLm;
use instruct_ner_core::traits::tokenizer::{SpecialTokens, TokenizerTrait};
use instruct_ner_utils::progress::ProgressReporter;
use instruct_ner_utils::text::preview;
use tracing::{debug, info};

/// Generates answers for instructions and parses them into entities
pub struct PredictionEngine<'a, M: CausalLm, T: TokenizerTrait> {
    model: &'a M,
    tokenizer: &'a T,
    special_tokens: SpecialTokens,
    generation: GenerationConfig,
    parser: AnswerParser,
    show_progress: bool,
}

impl<'a, M: CausalLm, T: TokenizerTrait> PredictionEngine<'a, M, T> {
    /// Create an engine
    ///
    /// A missing EOS id in `generation` is taken from `special_tokens`.
    pub fn new(
        model: &'a M,
        tokenizer: &'a T,
        special_tokens: SpecialTokens,
        mut generation: GenerationConfig,
        parser: AnswerParser,
    ) -> Result<Self> {
        generation.eos_token_id.get_or_insert(special_tokens.eos);
        generation.pad_token_id = special_tokens.pad;
        generation.validate()?;
        Ok(Self {
            model,
            tokenizer,
            special_tokens,
            generation,
            parser,
            show_progress: true,
        })
    }

    /// Hide the progress bar
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Decoding parameters in use
    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Encode `source` with a leading BOS
    pub fn encode_prompt(&self, source: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        if let Some(bos) = self.special_tokens.bos {
            ids.push(bos);
        }
        ids.extend(self.tokenizer.encode(source, false)?);
        Ok(ids)
    }

    /// Generate and parse the answer for one record
    pub fn predict_one(&self, generator: &mut Generator<'_, M>, instruction: &Instruction) -> Result<PredictionRecord> {
        let prompt = self.encode_prompt(&instruction.source)?;
        let output = generator.generate(&prompt)?;
        let generated_text = self.tokenizer.decode(&output, true)?;
        debug!("{}: {}", instruction.id, preview(&generated_text, 160));

        Ok(PredictionRecord {
            id: instruction.id.clone(),
            extracted: self.parser.parse(&generated_text),
            target: instruction.raw_entities.clone(),
            generated_text,
        })
    }

    /// Predict every record, `batch_size` records at a time
    ///
    /// Records within a batch are decoded one after another with a shared
    /// seeded generator, so results do not depend on the batch size.
    pub fn predict(&self, instructions: &[Instruction], batch_size: usize) -> Result<PredictionTable> {
        if batch_size == 0 {
            return Err(Error::Configuration("batch_size must be positive".to_string()));
        }
        let mut generator = Generator::new(self.model, self.generation.clone())?;
        let progress = if self.show_progress {
            ProgressReporter::new("predict", instructions.len())
        } else {
            ProgressReporter::silent("predict", instructions.len())
        };

        let mut table = PredictionTable::default();
        for (batch_idx, batch) in instructions.chunks(batch_size).enumerate() {
            for instruction in batch {
                table.push(self.predict_one(&mut generator, instruction)?);
            }
            progress.inc(batch.len());
            progress.set_message(format!("batch {}", batch_idx + 1));
        }
        progress.finish("prediction complete");

        info!("Predicted {} records", table.len());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::ScriptedModel;
    use instruct_ner_core::traits::tokenizer::WhitespaceTokenizer;
    use std::collections::BTreeMap;

    fn instruction(id: &str, source: &str, drug: &str) -> Instruction {
        let mut raw_entities = BTreeMap::new();
        raw_entities.insert("Drugname".to_string(), vec![drug.to_string()]);
        Instruction {
            instruction: "Find drugs".to_string(),
            input: "text".to_string(),
            output: format!("Drugname: {}", drug),
            source: source.to_string(),
            raw_entities,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_predict_parses_generation() {
        let tokenizer = WhitespaceTokenizer::new();
        let special = tokenizer.special_tokens();
        // intern the vocabulary in a fixed order
        let words = tokenizer.encode("Answer: Drugname: aspirin", false).unwrap();
        assert_eq!(words.len(), 3);
        let (answer, drugname, aspirin) = (words[0], words[1], words[2]);

        let vocab = aspirin as usize + 1;
        let mut next = vec![special.eos; vocab];
        next[answer as usize] = drugname;
        next[drugname as usize] = aspirin;
        next[aspirin as usize] = special.eos;
        let model = ScriptedModel {
            vocab,
            max_len: 32,
            next,
        };

        let parser = AnswerParser::new("Answer: ", &["Drugname"]);
        let engine = PredictionEngine::new(&model, &tokenizer, special, GenerationConfig::greedy(), parser)
            .unwrap()
            .with_progress(false);
        assert_eq!(engine.generation().eos_token_id, Some(special.eos));

        let records = vec![instruction("1", "Answer:", "aspirin"), instruction("2", "Answer:", "aspirin")];
        let table = engine.predict(&records, 1).unwrap();
        assert_eq!(table.len(), 2);

        let first = &table.records()[0];
        assert_eq!(first.id, "1");
        assert_eq!(first.extracted["Drugname"], vec!["aspirin"]);
        assert_eq!(table.metrics(&["Drugname"]).micro_f1, 1.0);
    }

    #[test]
    fn test_zero_batch_size() {
        let tokenizer = WhitespaceTokenizer::new();
        let model = ScriptedModel::chain(vec![0]);
        let engine = PredictionEngine::new(
            &model,
            &tokenizer,
            tokenizer.special_tokens(),
            GenerationConfig::greedy(),
            AnswerParser::new("Answer: ", &["Drugname"]),
        )
        .unwrap();
        assert!(engine.predict(&[], 0).is_err());
    }
}
