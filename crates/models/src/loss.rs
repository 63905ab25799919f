//! Loss functions for causal language model fine-tuning

use crate::candle_model::ToNerResult;
use candle_core::{DType, Tensor, D};
use instruct_ner_core::error::{Error, Result};

/// Shifted next-token cross-entropy, averaged over supervised positions
///
/// `logits` is (batch, seq_len, vocab); `labels` holds `batch * seq_len`
/// ids in row-major order. Position `t` predicts `labels[t + 1]`, and any
/// label equal to `ignore_index` is left out of the mean. Gradients flow
/// through `logits`.
pub fn masked_cross_entropy(logits: &Tensor, labels: &[i64], ignore_index: i64) -> Result<Tensor> {
    let (batch, seq_len, vocab) = logits.dims3().ner_training()?;
    if labels.len() != batch * seq_len {
        return Err(Error::Training(format!(
            "labels hold {} ids, logits cover {} positions",
            labels.len(),
            batch * seq_len
        )));
    }
    if seq_len < 2 {
        return Err(Error::Training("need at least two positions to shift labels".to_string()));
    }

    // shift on the host: targets for positions 0..seq_len-1 of every row
    let mut targets = Vec::with_capacity(batch * (seq_len - 1));
    let mut weights = Vec::with_capacity(batch * (seq_len - 1));
    for row in labels.chunks(seq_len) {
        for &label in &row[1..] {
            if label == ignore_index {
                targets.push(0u32);
                weights.push(0f32);
            } else if label < 0 || label as usize >= vocab {
                return Err(Error::Training(format!("label {} outside vocabulary of {}", label, vocab)));
            } else {
                targets.push(label as u32);
                weights.push(1f32);
            }
        }
    }

    let supervised: f32 = weights.iter().sum();
    if supervised == 0.0 {
        return Err(Error::Training("batch has no supervised tokens".to_string()));
    }

    let device = logits.device();
    let n = targets.len();
    let targets = Tensor::from_vec(targets, (n, 1), device).ner_training()?;
    let weights = Tensor::from_vec(weights, n, device).ner_training()?;

    let shifted = logits
        .narrow(1, 0, seq_len - 1)
        .and_then(|l| l.to_dtype(DType::F32))
        .and_then(|l| l.reshape((n, vocab)))
        .ner_training()?;
    let log_probs = candle_nn::ops::log_softmax(&shifted, D::Minus1).ner_training()?;
    let picked = log_probs
        .gather(&targets, 1)
        .and_then(|p| p.squeeze(1))
        .ner_training()?;

    (picked * weights)
        .and_then(|p| p.sum_all())
        .and_then(|s| s.affine(-1.0 / supervised as f64, 0.0))
        .ner_training()
}

/// Perplexity from a mean token loss
pub fn perplexity(loss: f32) -> f32 {
    loss.exp()
}
