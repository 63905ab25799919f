//! Tokenizer integration using the tokenizers crate

use crate::config::LlamaConfig;
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::traits::tokenizer::{SpecialTokens, TokenizerTrait};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokenizers::Tokenizer as HFTokenizer;

/// File name of a serialized fast tokenizer
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Hugging Face tokenizer wrapper
#[derive(Clone, Debug)]
pub struct HFTokenizerWrapper {
    inner: Arc<HFTokenizer>,
}

impl HFTokenizerWrapper {
    /// Load from a local directory, a `tokenizer.json` path or a hub repo id
    pub fn from_pretrained(path: impl AsRef<str>) -> Result<Self> {
        let path = path.as_ref();
        let local = Path::new(path);

        let tokenizer_file = if local.is_file() {
            local.to_path_buf()
        } else if local.is_dir() {
            local.join(TOKENIZER_FILE)
        } else {
            let api = hf_hub::api::sync::Api::new()
                .map_err(|e| Error::Tokenization(format!("Failed to create HF API: {}", e)))?;
            api.model(path.to_string())
                .get(TOKENIZER_FILE)
                .map_err(|e| Error::Tokenization(format!("Failed to get tokenizer for {} from HF Hub: {}", path, e)))?
        };

        Self::from_file(&tokenizer_file)
    }

    /// Load a `tokenizer.json`
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = HFTokenizer::from_file(path)
            .map_err(|e| Error::Tokenization(format!("Failed to load tokenizer from {}: {}", path.display(), e)))?;
        Ok(Self::from_tokenizer(tokenizer))
    }

    /// Wrap an already built tokenizer
    pub fn from_tokenizer(tokenizer: HFTokenizer) -> Self {
        Self {
            inner: Arc::new(tokenizer),
        }
    }

    /// Whitespace-split word-level tokenizer over a fixed vocabulary
    ///
    /// Ids 0, 1 and 2 are `<unk>`, `<s>` and `</s>`; `words` follow in order.
    pub fn word_level(words: &[&str]) -> Result<Self> {
        let specials = ["<unk>", "<s>", "</s>"];
        let vocab: serde_json::Map<String, serde_json::Value> = specials
            .iter()
            .chain(words)
            .enumerate()
            .map(|(i, token)| (token.to_string(), serde_json::json!(i)))
            .collect();
        let added: Vec<serde_json::Value> = specials
            .iter()
            .enumerate()
            .map(|(i, token)| {
                serde_json::json!({"id": i, "content": token, "single_word": false, "lstrip": false,
                    "rstrip": false, "normalized": false, "special": true})
            })
            .collect();
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added,
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "<unk>"}
        });
        let tokenizer = HFTokenizer::from_str(&json.to_string())
            .map_err(|e| Error::Tokenization(format!("Failed to build word-level tokenizer: {}", e)))?;
        Ok(Self::from_tokenizer(tokenizer))
    }

    /// Get the underlying tokenizer
    pub fn inner(&self) -> &HFTokenizer {
        &self.inner
    }

    /// Resolve BOS, EOS and PAD ids
    ///
    /// Named tokens win over the model config. PAD is `<pad>`, else `<unk>`,
    /// else the config's `pad_token_id`, else 0, matching the LLaMA convention.
    pub fn special_tokens(&self, config: Option<&LlamaConfig>) -> Result<SpecialTokens> {
        let bos = self
            .token_to_id("<s>")
            .or_else(|| config.and_then(|c| c.bos_token_id));
        let eos = self
            .token_to_id("</s>")
            .or_else(|| config.and_then(LlamaConfig::eos_token_id))
            .ok_or_else(|| Error::Tokenization("tokenizer has no end-of-sequence token".to_string()))?;
        let pad = self
            .token_to_id("<pad>")
            .or_else(|| self.token_to_id("<unk>"))
            .or_else(|| config.and_then(|c| c.pad_token_id))
            .unwrap_or(0);

        Ok(SpecialTokens { bos, eos, pad })
    }

    /// Write `tokenizer.json` into a directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.inner
            .save(dir.join(TOKENIZER_FILE), false)
            .map_err(|e| Error::Tokenization(format!("Failed to save tokenizer: {}", e)))
    }
}

impl TokenizerTrait for HFTokenizerWrapper {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| Error::Tokenization(format!("Encoding failed: {}", e)))?;

        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| Error::Tokenization(format!("Decoding failed: {}", e)))
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.inner.id_to_token(id)
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn word_level(words: &[&str]) -> HFTokenizerWrapper {
        HFTokenizerWrapper::word_level(words).unwrap()
    }

    #[test]
    fn test_tokenizer_missing_local_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = HFTokenizerWrapper::from_pretrained(dir.path().to_string_lossy());
        assert!(matches!(result, Err(Error::Tokenization(_))));
    }

    #[test]
    fn test_special_tokens_from_vocab() {
        let tokenizer = word_level(&["hello"]);
        let special = tokenizer.special_tokens(None).unwrap();
        assert_eq!(special, SpecialTokens::default());
    }

    #[test]
    fn test_pad_prefers_unk_over_config() {
        let tokenizer = word_level(&["hello"]);
        let mut config = LlamaConfig::tiny(4);
        config.pad_token_id = Some(3);
        let special = tokenizer.special_tokens(Some(&config)).unwrap();
        assert_eq!(special.pad, 0);
        assert_eq!(special.eos, 2);
    }

    #[test]
    fn test_encode_decode() {
        let tokenizer = word_level(&["hello", "world"]);
        let ids = tokenizer.encode("hello world", false).unwrap();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(tokenizer.token_to_id("</s>"), Some(2));
        assert_eq!(tokenizer.id_to_token(3).as_deref(), Some("hello"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = word_level(&["hello"]);
        tokenizer.save(dir.path()).unwrap();
        let reloaded = HFTokenizerWrapper::from_pretrained(dir.path().to_string_lossy()).unwrap();
        assert_eq!(reloaded.token_to_id("hello"), Some(3));
    }

    #[test]
    fn test_tokenizer_wrapper_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<HFTokenizerWrapper>();
    }
}
