//! Text generation with logits processing and sampling
//!
//! Each step turns the next-token logits into a choice in a fixed order:
//! repetition penalty, no-repeat-ngram ban, temperature, top-k, top-p. The
//! first two always apply; the last three shape the distribution only when
//! sampling.

use crate::beam::beam_search;
use instruct_ner_core::config::GenerationConfig;
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::traits::model::CausalLm;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// CTRL-style repetition penalty on every token already in `history`
///
/// Positive scores are divided by `penalty`, negative ones multiplied.
pub fn apply_repetition_penalty(history: &[u32], scores: &mut [f32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let seen: HashSet<u32> = history.iter().copied().collect();
    for token in seen {
        if let Some(score) = scores.get_mut(token as usize) {
            *score = if *score < 0.0 { *score * penalty } else { *score / penalty };
        }
    }
}

/// Tokens that would complete an n-gram already present in `history`
pub fn banned_ngram_tokens(history: &[u32], ngram_size: usize) -> Vec<u32> {
    if ngram_size == 0 || history.len() + 1 < ngram_size {
        return Vec::new();
    }
    let prefix_len = ngram_size - 1;
    let current = &history[history.len() - prefix_len..];
    history
        .windows(ngram_size)
        .filter(|ngram| &ngram[..prefix_len] == current)
        .map(|ngram| ngram[prefix_len])
        .collect()
}

/// Ban every token that would repeat an n-gram of `history`
pub fn apply_no_repeat_ngram(history: &[u32], scores: &mut [f32], ngram_size: usize) {
    for token in banned_ngram_tokens(history, ngram_size) {
        if let Some(score) = scores.get_mut(token as usize) {
            *score = f32::NEG_INFINITY;
        }
    }
}

/// Keep the `k` highest scores, masking the rest
pub fn apply_top_k(scores: &mut [f32], k: usize) {
    if k == 0 || k >= scores.len() {
        return;
    }
    let mut sorted: Vec<f32> = scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for score in scores.iter_mut() {
        if *score < threshold {
            *score = f32::NEG_INFINITY;
        }
    }
}

/// Keep the smallest set of tokens whose probability mass reaches `top_p`
///
/// The most likely token always survives.
pub fn apply_top_p(scores: &mut [f32], top_p: f32) {
    if top_p >= 1.0 {
        return;
    }
    let probs = softmax(scores);
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0;
    for (rank, &idx) in order.iter().enumerate() {
        if rank > 0 && cumulative >= top_p {
            scores[idx] = f32::NEG_INFINITY;
        }
        cumulative += probs[idx];
    }
}

/// Numerically stable softmax; all `-inf` input gives all zeros
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; scores.len()];
    }
    let exp: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Log-softmax of raw logits
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|&l| (l - max).exp()).sum::<f32>().ln() + max;
    logits.iter().map(|&l| l - log_sum).collect()
}

/// Index of the highest score
pub fn argmax(scores: &[f32]) -> Result<u32> {
    scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx as u32)
        .ok_or_else(|| Error::Generation("Empty logits".to_string()))
}

/// Draw an index proportionally to non-negative `weights`
///
/// Returns `None` when all weights are zero.
pub fn sample_index(weights: &[f32], rng: &mut impl Rng) -> Option<usize> {
    let total: f32 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let target = rng.gen::<f32>() * total;
    let mut cumsum = 0.0;
    let mut last_nonzero = None;
    for (idx, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        cumsum += w;
        last_nonzero = Some(idx);
        if target < cumsum {
            return Some(idx);
        }
    }
    last_nonzero
}

/// Logits pipeline configured from a [`GenerationConfig`]
#[derive(Clone, Debug)]
pub struct LogitsProcessor {
    repetition_penalty: f32,
    no_repeat_ngram_size: usize,
    do_sample: bool,
    temperature: f32,
    top_k: usize,
    top_p: f32,
}

impl LogitsProcessor {
    /// Build from decoding parameters
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            repetition_penalty: config.repetition_penalty,
            no_repeat_ngram_size: config.no_repeat_ngram_size,
            do_sample: config.do_sample,
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
        }
    }

    /// Repetition penalty and n-gram ban
    pub fn penalize(&self, history: &[u32], scores: &mut [f32]) {
        apply_repetition_penalty(history, scores, self.repetition_penalty);
        apply_no_repeat_ngram(history, scores, self.no_repeat_ngram_size);
    }

    /// Temperature, top-k and top-p; a no-op without sampling
    pub fn warp(&self, scores: &mut [f32]) {
        if !self.do_sample {
            return;
        }
        if self.temperature != 1.0 {
            for score in scores.iter_mut() {
                *score /= self.temperature;
            }
        }
        apply_top_k(scores, self.top_k);
        apply_top_p(scores, self.top_p);
    }

    /// Full pipeline in place
    pub fn process(&self, history: &[u32], scores: &mut [f32]) {
        self.penalize(history, scores);
        self.warp(scores);
    }

    /// Whether tokens are drawn at random
    pub fn do_sample(&self) -> bool {
        self.do_sample
    }
}

/// Generates continuations of prompts with a [`CausalLm`]
pub struct Generator<'a, M: CausalLm> {
    model: &'a M,
    config: GenerationConfig,
    processor: LogitsProcessor,
    rng: StdRng,
}

impl<'a, M: CausalLm> Generator<'a, M> {
    /// Create a generator; the RNG is seeded from `config.seed`
    pub fn new(model: &'a M, config: GenerationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            processor: LogitsProcessor::from_config(&config),
            rng: StdRng::seed_from_u64(config.seed),
            config,
        })
    }

    /// Decoding parameters
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate after `prompt`; the result starts with the prompt
    ///
    /// Stops at EOS, after `max_new_tokens`, or at the model context limit.
    pub fn generate(&mut self, prompt: &[u32]) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            return Err(Error::Generation("cannot generate from an empty prompt".to_string()));
        }
        if prompt.len() >= self.model.max_seq_len() {
            return Err(Error::Generation(format!(
                "prompt of {} tokens leaves no room within {}",
                prompt.len(),
                self.model.max_seq_len()
            )));
        }
        if self.config.num_beams > 1 {
            beam_search(self.model, prompt, &self.config, &self.processor, &mut self.rng)
        } else {
            self.generate_single(prompt)
        }
    }

    fn generate_single(&mut self, prompt: &[u32]) -> Result<Vec<u32>> {
        let mut tokens = prompt.to_vec();
        let mut cache = self.model.new_cache()?;
        let mut logits = self.model.forward_step(prompt, &mut cache)?;

        for _ in 0..self.config.max_new_tokens {
            self.processor.process(&tokens, &mut logits);
            let next = if self.processor.do_sample() {
                let probs = softmax(&logits);
                match sample_index(&probs, &mut self.rng) {
                    Some(idx) => idx as u32,
                    None => argmax(&logits)?,
                }
            } else {
                argmax(&logits)?
            };
            tokens.push(next);

            if Some(next) == self.config.eos_token_id || tokens.len() >= self.model.max_seq_len() {
                break;
            }
            logits = self.model.forward_step(&[next], &mut cache)?;
        }

        Ok(tokens)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Model that replays fixed logits keyed on the last token
    pub(crate) struct ScriptedModel {
        pub vocab: usize,
        pub max_len: usize,
        /// `next[t]` is the preferred successor of token `t`
        pub next: Vec<u32>,
    }

    impl ScriptedModel {
        pub(crate) fn chain(next: Vec<u32>) -> Self {
            Self {
                vocab: next.len(),
                max_len: 64,
                next,
            }
        }
    }

    impl CausalLm for ScriptedModel {
        type Cache = Vec<u32>;

        fn new_cache(&self) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }

        fn forward_step(&self, tokens: &[u32], cache: &mut Vec<u32>) -> Result<Vec<f32>> {
            cache.extend_from_slice(tokens);
            let last = *cache.last().ok_or_else(|| Error::Generation("empty".to_string()))?;
            let mut logits = vec![0.0; self.vocab];
            logits[self.next[last as usize] as usize] = 5.0;
            Ok(logits)
        }

        fn vocab_size(&self) -> usize {
            self.vocab
        }

        fn max_seq_len(&self) -> usize {
            self.max_len
        }
    }

    #[test]
    fn test_repetition_penalty() {
        let mut scores = vec![2.0, -2.0, 1.0];
        apply_repetition_penalty(&[0, 1, 1], &mut scores, 2.0);
        assert_eq!(scores, vec![1.0, -4.0, 1.0]);
    }

    #[test]
    fn test_banned_ngrams() {
        // bigram ban: history ends in 3, and 3 was followed by 4 and 5 before
        let history = [3, 4, 1, 3, 5, 3];
        let mut banned = banned_ngram_tokens(&history, 2);
        banned.sort();
        assert_eq!(banned, vec![4, 5]);
        assert!(banned_ngram_tokens(&[1, 2], 4).is_empty());
        assert!(banned_ngram_tokens(&history, 0).is_empty());

        let mut scores = vec![0.0; 6];
        apply_no_repeat_ngram(&history, &mut scores, 2);
        assert_eq!(scores[4], f32::NEG_INFINITY);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn test_top_k_and_top_p() {
        let mut scores = vec![1.0, 4.0, 3.0, 2.0];
        apply_top_k(&mut scores, 2);
        assert_eq!(scores[0], f32::NEG_INFINITY);
        assert_eq!(scores[3], f32::NEG_INFINITY);
        assert_eq!(scores[1], 4.0);

        // one dominant token carries the whole nucleus
        let mut scores = vec![10.0, 0.0, 0.0];
        apply_top_p(&mut scores, 0.5);
        assert_eq!(scores[0], 10.0);
        assert!(scores[1..].iter().all(|s| *s == f32::NEG_INFINITY));
    }

    #[test]
    fn test_softmax_and_log_softmax() {
        let probs = softmax(&[0.0, 0.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert_eq!(softmax(&[f32::NEG_INFINITY; 2]), vec![0.0, 0.0]);

        let log_probs = log_softmax(&[1.0, 1.0, 1.0, 1.0]);
        assert!((log_probs[2] - (0.25f32).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_sample_index_skips_zero_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(sample_index(&[0.0, 1.0, 0.0], &mut rng), Some(1));
        }
        assert_eq!(sample_index(&[0.0, 0.0], &mut rng), None);
    }

    #[test]
    fn test_greedy_generation_stops_at_eos() {
        // 1 -> 3 -> 4 -> 2 (eos)
        let model = ScriptedModel::chain(vec![0, 3, 2, 4, 2]);
        let config = GenerationConfig {
            eos_token_id: Some(2),
            ..GenerationConfig::greedy()
        };
        let mut generator = Generator::new(&model, config).unwrap();
        assert_eq!(generator.generate(&[1]).unwrap(), vec![1, 3, 4, 2]);
    }

    #[test]
    fn test_max_new_tokens() {
        let model = ScriptedModel::chain(vec![1, 1]);
        let config = GenerationConfig::greedy().with_max_new_tokens(3);
        let mut generator = Generator::new(&model, config).unwrap();
        assert_eq!(generator.generate(&[0]).unwrap(), vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_no_repeat_ngram_changes_greedy_path() {
        // without the ban the model loops 1 -> 1 forever
        let model = ScriptedModel::chain(vec![0, 1]);
        let config = GenerationConfig {
            no_repeat_ngram_size: 2,
            ..GenerationConfig::greedy().with_max_new_tokens(2)
        };
        let mut generator = Generator::new(&model, config).unwrap();
        assert_eq!(generator.generate(&[1]).unwrap(), vec![1, 1, 0]);
    }

    #[test]
    fn test_sampling_is_seeded() {
        let model = ScriptedModel::chain(vec![1, 2, 3, 0]);
        let config = GenerationConfig {
            num_beams: 1,
            temperature: 5.0,
            top_k: 0,
            top_p: 1.0,
            no_repeat_ngram_size: 0,
            max_new_tokens: 10,
            ..GenerationConfig::default()
        };
        let a = Generator::new(&model, config.clone()).unwrap().generate(&[0]).unwrap();
        let b = Generator::new(&model, config).unwrap().generate(&[0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 11);
    }

    #[test]
    fn test_rejects_empty_prompt() {
        let model = ScriptedModel::chain(vec![0]);
        let mut generator = Generator::new(&model, GenerationConfig::greedy()).unwrap();
        assert!(generator.generate(&[]).is_err());
    }
}
