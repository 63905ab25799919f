//! Tokenizer trait

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Special token ids a causal LM needs for training and generation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Beginning-of-sequence id, prepended to every prompt when present
    pub bos: Option<u32>,

    /// End-of-sequence id, appended to every target
    pub eos: u32,

    /// Padding id
    pub pad: u32,
}

impl Default for SpecialTokens {
    /// LLaMA ids: `<unk>` = 0 doubles as padding, `<s>` = 1, `</s>` = 2
    fn default() -> Self {
        Self {
            bos: Some(1),
            eos: 2,
            pad: 0,
        }
    }
}

/// Tokenizer trait
///
/// This trait defines the interface that tokenizers must provide
/// to work with the instruction NER pipeline.
pub trait TokenizerTrait: Send + Sync {
    /// Encode text to token IDs
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>>;

    /// Decode token IDs to text
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// Get token count for text
    fn token_count(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text, false)?.len())
    }

    /// Get vocabulary size
    fn vocab_size(&self) -> usize;

    /// Get the token for a given ID
    fn id_to_token(&self, id: u32) -> Option<String>;

    /// Get the ID for a given token
    fn token_to_id(&self, token: &str) -> Option<u32>;

    /// Encode batch of texts
    fn encode_batch(&self, texts: &[&str], add_special_tokens: bool) -> Result<Vec<Vec<u32>>> {
        texts
            .iter()
            .map(|text| self.encode(text, add_special_tokens))
            .collect()
    }

    /// Decode batch of token IDs
    fn decode_batch(&self, batch: &[Vec<u32>], skip_special_tokens: bool) -> Result<Vec<String>> {
        batch
            .iter()
            .map(|ids| self.decode(ids, skip_special_tokens))
            .collect()
    }
}

/// Whitespace tokenizer with a growing vocabulary, for tests
///
/// Ids 0..=2 are reserved for `<unk>`, `<s>` and `</s>`. Unseen words get
/// the next free id, so decoding returns the words joined by spaces.
#[derive(Debug, Default)]
pub struct WhitespaceTokenizer {
    vocab: RwLock<Vocab>,
}

#[derive(Debug, Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    tokens: Vec<String>,
}

impl WhitespaceTokenizer {
    const SPECIAL: [&'static str; 3] = ["<unk>", "<s>", "</s>"];

    /// Create a tokenizer holding only the special tokens
    pub fn new() -> Self {
        let tokenizer = Self::default();
        for token in Self::SPECIAL {
            tokenizer.intern(token);
        }
        tokenizer
    }

    /// Special token ids matching the reserved vocabulary
    pub fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens::default()
    }

    fn intern(&self, token: &str) -> u32 {
        if let Ok(vocab) = self.vocab.read() {
            if let Some(&id) = vocab.ids.get(token) {
                return id;
            }
        }
        let mut vocab = match self.vocab.write() {
            Ok(vocab) => vocab,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(&id) = vocab.ids.get(token) {
            return id;
        }
        let id = vocab.tokens.len() as u32;
        vocab.tokens.push(token.to_string());
        vocab.ids.insert(token.to_string(), id);
        id
    }
}

impl TokenizerTrait for WhitespaceTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        if add_special_tokens {
            ids.push(1);
        }
        ids.extend(text.split_whitespace().map(|t| self.intern(t)));
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let vocab = self
            .vocab
            .read()
            .map_err(|_| Error::Tokenization("vocabulary lock poisoned".to_string()))?;
        let words: Vec<&str> = ids
            .iter()
            .filter(|&&id| !(skip_special_tokens && (id as usize) < Self::SPECIAL.len()))
            .map(|&id| vocab.tokens.get(id as usize).map_or("<unk>", String::as_str))
            .collect();
        Ok(words.join(" "))
    }

    fn vocab_size(&self) -> usize {
        self.vocab.read().map(|v| v.tokens.len()).unwrap_or(0)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.vocab.read().ok()?.tokens.get(id as usize).cloned()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.read().ok()?.ids.get(token).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_tokenizer_encode() {
        let tokenizer = WhitespaceTokenizer::new();
        let ids = tokenizer.encode("hello world hello", false).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], ids[2]);
        assert!(ids[0] >= 3);
    }

    #[test]
    fn test_whitespace_tokenizer_round_trip() {
        let tokenizer = WhitespaceTokenizer::new();
        let ids = tokenizer.encode("PER: John", true).unwrap();
        assert_eq!(ids[0], 1);
        assert_eq!(tokenizer.decode(&ids, true).unwrap(), "PER: John");
        assert_eq!(tokenizer.decode(&ids, false).unwrap(), "<s> PER: John");
    }

    #[test]
    fn test_whitespace_tokenizer_count() {
        let tokenizer = WhitespaceTokenizer::new();
        let count = tokenizer.token_count("hello world test").unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_whitespace_tokenizer_batch() {
        let tokenizer = WhitespaceTokenizer::new();
        let batch = tokenizer.encode_batch(&["hello world", "foo bar"], false).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].len(), 2);
        assert_eq!(batch[1].len(), 2);
    }

    #[test]
    fn test_special_token_lookup() {
        let tokenizer = WhitespaceTokenizer::new();
        assert_eq!(tokenizer.token_to_id("</s>"), Some(2));
        assert_eq!(tokenizer.id_to_token(1).as_deref(), Some("<s>"));
        assert_eq!(tokenizer.vocab_size(), 3);
    }
}
