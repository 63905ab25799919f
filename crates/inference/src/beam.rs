//! Beam search and beam-sample decoding
//!
//! Every running beam owns a copy of the model cache. Each step scores
//! `2 * num_beams` candidates across all beams, by top score or, with
//! sampling, by drawing from the joint distribution after each beam's row
//! is warped on its own. Candidates ending in
//! EOS become finished hypotheses scored by
//! `sum_logprobs / gen_len ^ length_penalty`.

use crate::generator::{log_softmax, sample_index, softmax, LogitsProcessor};
use instruct_ner_core::config::GenerationConfig;
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::traits::model::CausalLm;
use rand::Rng;

/// A finished sequence with its score
#[derive(Clone, Debug, PartialEq)]
pub struct Hypothesis {
    /// Generated tokens, without the prompt
    pub tokens: Vec<u32>,
    /// Length-normalised log probability
    pub score: f32,
}

/// The `num_beams` best finished hypotheses
#[derive(Clone, Debug)]
pub struct BeamHypotheses {
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    hyps: Vec<Hypothesis>,
}

impl BeamHypotheses {
    /// Empty set
    pub fn new(num_beams: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            num_beams,
            length_penalty,
            early_stopping,
            hyps: Vec::with_capacity(num_beams + 1),
        }
    }

    /// Number of finished hypotheses kept
    pub fn len(&self) -> usize {
        self.hyps.len()
    }

    /// Check if nothing finished yet
    pub fn is_empty(&self) -> bool {
        self.hyps.is_empty()
    }

    fn normalise(&self, sum_logprobs: f32, gen_len: usize) -> f32 {
        sum_logprobs / (gen_len.max(1) as f32).powf(self.length_penalty)
    }

    fn worst_score(&self) -> f32 {
        self.hyps.iter().map(|h| h.score).fold(f32::INFINITY, f32::min)
    }

    /// Offer a finished sequence
    pub fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32) {
        let score = self.normalise(sum_logprobs, tokens.len());
        if self.hyps.len() < self.num_beams || score > self.worst_score() {
            self.hyps.push(Hypothesis { tokens, score });
            if self.hyps.len() > self.num_beams {
                if let Some(worst) = self
                    .hyps
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
                    .map(|(i, _)| i)
                {
                    self.hyps.remove(worst);
                }
            }
        }
    }

    /// Whether no running beam can still enter the set
    pub fn is_done(&self, best_sum_logprobs: f32, gen_len: usize) -> bool {
        if self.hyps.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.worst_score() >= self.normalise(best_sum_logprobs, gen_len)
    }

    /// Highest scoring hypothesis
    pub fn best(&self) -> Option<&Hypothesis> {
        self.hyps.iter().max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

struct Beam<C> {
    tokens: Vec<u32>,
    score: f32,
    cache: C,
    logits: Vec<f32>,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    beam: usize,
    token: u32,
    score: f32,
}

fn top_candidates(scores: &[Vec<f32>], n: usize) -> Vec<Candidate> {
    let mut all: Vec<Candidate> = scores
        .iter()
        .enumerate()
        .flat_map(|(beam, row)| {
            row.iter().enumerate().map(move |(token, &score)| Candidate {
                beam,
                token: token as u32,
                score,
            })
        })
        .filter(|c| c.score > f32::NEG_INFINITY)
        .collect();
    all.sort_by(|a, b| b.score.total_cmp(&a.score));
    all.truncate(n);
    all
}

fn sampled_candidates(
    scores: &[Vec<f32>],
    processor: &LogitsProcessor,
    n: usize,
    rng: &mut impl Rng,
) -> Vec<Candidate> {
    let vocab = scores.first().map(Vec::len).unwrap_or(0);
    let mut flat = Vec::with_capacity(scores.len() * vocab);
    for row in scores {
        let start = flat.len();
        flat.extend_from_slice(row);
        processor.warp(&mut flat[start..]);
    }
    let mut probs = softmax(&flat);

    let mut drawn = Vec::with_capacity(n);
    while drawn.len() < n {
        let Some(idx) = sample_index(&probs, rng) else {
            break;
        };
        probs[idx] = 0.0;
        drawn.push(Candidate {
            beam: idx / vocab,
            token: (idx % vocab) as u32,
            score: scores[idx / vocab][idx % vocab],
        });
    }
    drawn.sort_by(|a, b| b.score.total_cmp(&a.score));
    drawn
}

/// Beam search from `prompt`; the result starts with the prompt
pub fn beam_search<M: CausalLm>(
    model: &M,
    prompt: &[u32],
    config: &GenerationConfig,
    processor: &LogitsProcessor,
    rng: &mut impl Rng,
) -> Result<Vec<u32>> {
    let num_beams = config.num_beams.max(1);
    let eos = config.eos_token_id;
    let mut hypotheses = BeamHypotheses::new(num_beams, config.length_penalty, config.early_stopping);

    let mut cache = model.new_cache()?;
    let logits = model.forward_step(prompt, &mut cache)?;
    // identical beams: only the first one expands on the first step
    let mut beams = vec![Beam {
        tokens: Vec::new(),
        score: 0.0,
        cache,
        logits,
    }];

    for step in 0..config.max_new_tokens {
        let cur_len = step + 1;
        let scores: Vec<Vec<f32>> = beams
            .iter()
            .map(|beam| {
                let history: Vec<u32> = prompt.iter().chain(&beam.tokens).copied().collect();
                let mut row = log_softmax(&beam.logits);
                processor.penalize(&history, &mut row);
                row.iter_mut().for_each(|s| *s += beam.score);
                row
            })
            .collect();

        let candidates = if processor.do_sample() {
            sampled_candidates(&scores, processor, 2 * num_beams, rng)
        } else {
            top_candidates(&scores, 2 * num_beams)
        };

        let at_limit = prompt.len() + cur_len >= model.max_seq_len();
        let mut next: Vec<(usize, u32, f32)> = Vec::with_capacity(num_beams);
        for (rank, candidate) in candidates.iter().enumerate() {
            if Some(candidate.token) == eos {
                if rank < num_beams {
                    let mut tokens = beams[candidate.beam].tokens.clone();
                    tokens.push(candidate.token);
                    hypotheses.add(tokens, candidate.score);
                }
            } else {
                next.push((candidate.beam, candidate.token, candidate.score));
            }
            if next.len() == num_beams {
                break;
            }
        }

        if next.is_empty() {
            break;
        }

        let best_running = next.iter().map(|n| n.2).fold(f32::NEG_INFINITY, f32::max);
        let done = hypotheses.is_done(best_running, cur_len);
        let last_step = cur_len == config.max_new_tokens || at_limit;

        if done || last_step {
            if !done {
                for (parent, token, score) in &next {
                    let mut tokens = beams[*parent].tokens.clone();
                    tokens.push(*token);
                    hypotheses.add(tokens, *score);
                }
            }
            break;
        }

        let mut expanded = Vec::with_capacity(next.len());
        for (parent, token, score) in next {
            let parent = &beams[parent];
            let mut cache = parent.cache.clone();
            let logits = model.forward_step(&[token], &mut cache)?;
            let mut tokens = parent.tokens.clone();
            tokens.push(token);
            expanded.push(Beam {
                tokens,
                score,
                cache,
                logits,
            });
        }
        beams = expanded;
    }

    if hypotheses.is_empty() {
        for beam in &beams {
            hypotheses.add(beam.tokens.clone(), beam.score);
        }
    }

    let best = hypotheses
        .best()
        .ok_or_else(|| Error::Generation("beam search produced no hypothesis".to_string()))?;
    Ok(prompt.iter().chain(&best.tokens).copied().collect())
}
