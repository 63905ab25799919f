//! Resolving and loading model and adapter files
//!
//! A model name is either a local directory or a hub repo id. If the name
//! points at a PEFT adapter, the base model named in its
//! `adapter_config.json` is loaded first and the adapter is applied on top.

use crate::adapter::{apply_adapter_weights, load_adapter, save_adapter};
use crate::candle_model::dtype_from_torch_name;
use crate::config::LlamaConfig;
use crate::llama::LlamaForCausalLM;
use crate::tokenizer::{HFTokenizerWrapper, TOKENIZER_FILE};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use hf_hub::api::sync::{Api, ApiRepo};
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::traits::tokenizer::SpecialTokens;
use instruct_ner_core::training::{AdapterConfig, LoRAConfig, ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Model architecture file
pub const CONFIG_FILE: &str = "config.json";

/// Single-file weights
pub const SAFETENSORS_FILE: &str = "model.safetensors";

/// Index of sharded weights
pub const SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Where model files come from
enum FileSource {
    Local(PathBuf),
    Hub(ApiRepo),
}

impl FileSource {
    fn open(name: &str) -> Result<Self> {
        let local = Path::new(name);
        if local.is_dir() {
            return Ok(Self::Local(local.to_path_buf()));
        }
        let api = Api::new().map_err(|e| Error::ModelLoading(format!("Failed to create HF API: {}", e)))?;
        Ok(Self::Hub(api.model(name.to_string())))
    }

    fn get(&self, file: &str) -> Result<PathBuf> {
        match self {
            Self::Local(dir) => {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(Error::NotFound(path.display().to_string()))
                }
            }
            Self::Hub(repo) => repo
                .get(file)
                .map_err(|e| Error::NotFound(format!("{}: {}", file, e))),
        }
    }
}

#[derive(Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Shard file names listed in a `model.safetensors.index.json`
pub fn shard_files(index_path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(index_path)?;
    let index: SafetensorsIndex = serde_json::from_str(&content)?;
    let shards: BTreeSet<String> = index.weight_map.into_values().collect();
    if shards.is_empty() {
        return Err(Error::ModelLoading(format!("{} lists no shards", index_path.display())));
    }
    Ok(shards.into_iter().collect())
}

/// Files of a base model
#[derive(Clone, Debug)]
pub struct ModelFiles {
    /// Name the files were resolved from
    pub name: String,
    /// Parsed `config.json`
    pub config: LlamaConfig,
    /// Safetensors files, in shard order
    pub weights: Vec<PathBuf>,
    /// `tokenizer.json`, if the repo has one
    pub tokenizer: Option<PathBuf>,
}

/// Resolve the files of a base model from a local dir or the hub
pub fn fetch_model(name: &str) -> Result<ModelFiles> {
    let source = FileSource::open(name)?;
    let config = LlamaConfig::from_file(source.get(CONFIG_FILE)?)?;

    let weights = match source.get(SAFETENSORS_FILE) {
        Ok(path) => vec![path],
        Err(_) => {
            let index_path = source.get(SAFETENSORS_INDEX_FILE)?;
            shard_files(&index_path)?
                .iter()
                .map(|shard| source.get(shard))
                .collect::<Result<Vec<_>>>()?
        }
    };

    Ok(ModelFiles {
        name: name.to_string(),
        config,
        weights,
        tokenizer: source.get(TOKENIZER_FILE).ok(),
    })
}

/// Files of a PEFT adapter
#[derive(Clone, Debug)]
pub struct AdapterFiles {
    /// Directory holding the adapter files
    pub dir: PathBuf,
    /// Parsed `adapter_config.json`
    pub config: AdapterConfig,
}

/// Resolve an adapter, or `None` if `name` is not one
pub fn fetch_adapter(name: &str) -> Result<Option<AdapterFiles>> {
    let source = FileSource::open(name)?;
    let Ok(config_path) = source.get(ADAPTER_CONFIG_FILE) else {
        return Ok(None);
    };
    let weights_path = source.get(ADAPTER_WEIGHTS_FILE)?;
    let dir = weights_path
        .parent()
        .ok_or_else(|| Error::ModelLoading(format!("no parent directory for {}", weights_path.display())))?
        .to_path_buf();
    if config_path.parent() != Some(dir.as_path()) {
        return Err(Error::ModelLoading(format!(
            "adapter files of {} resolved to different directories",
            name
        )));
    }
    let config = AdapterConfig::from_dir(&dir)?;
    Ok(Some(AdapterFiles { dir, config }))
}

/// Memory-map safetensors files into a var builder
pub fn load_weights(paths: &[PathBuf], dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    // SAFETY: the files are not modified while the model is alive.
    unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device) }
        .map_err(|e| Error::ModelLoading(format!("Failed to map weights: {}", e)))
}

/// How to load a model
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Target device
    pub device: Device,
    /// Weight dtype; defaults to F32 on CPU and the checkpoint dtype elsewhere
    pub dtype: Option<DType>,
    /// Fresh adapter to attach when the model name is not an adapter
    pub lora: Option<LoRAConfig>,
    /// Fail unless the model name is an adapter
    pub expect_adapter: bool,
}

impl LoadOptions {
    /// Plain loading on `device`
    pub fn new(device: Device) -> Self {
        Self {
            device,
            dtype: None,
            lora: None,
            expect_adapter: false,
        }
    }

    /// Attach a fresh adapter
    pub fn with_lora(mut self, lora: LoRAConfig) -> Self {
        self.lora = Some(lora);
        self
    }

    /// Override the weight dtype
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Require the model name to be an adapter
    pub fn with_expect_adapter(mut self, expect_adapter: bool) -> Self {
        self.expect_adapter = expect_adapter;
        self
    }

    fn resolve_dtype(&self, config: &LlamaConfig) -> DType {
        if let Some(dtype) = self.dtype {
            return dtype;
        }
        if self.device.is_cpu() {
            return DType::F32;
        }
        config
            .torch_dtype
            .as_deref()
            .and_then(dtype_from_torch_name)
            .unwrap_or(DType::F32)
    }
}

/// A model with its tokenizer and adapter variables
pub struct LoadedModel {
    /// The model
    pub model: LlamaForCausalLM,
    /// Its tokenizer
    pub tokenizer: HFTokenizerWrapper,
    /// Resolved special token ids
    pub special_tokens: SpecialTokens,
    /// Trainable adapter variables; empty without an adapter
    pub varmap: VarMap,
    /// Adapter hyperparameters, if an adapter is attached
    pub lora: Option<LoRAConfig>,
    /// Base model name, as written into `adapter_config.json`
    pub base_model_name: String,
}

impl LoadedModel {
    /// Build from parts already in memory
    ///
    /// `weights` are base tensors under HF names. A fresh adapter is
    /// created when `lora` is given.
    pub fn from_parts(
        config: &LlamaConfig,
        weights: HashMap<String, candle_core::Tensor>,
        tokenizer: HFTokenizerWrapper,
        lora: Option<LoRAConfig>,
        base_model_name: impl Into<String>,
        device: &Device,
    ) -> Result<Self> {
        let vb = VarBuilder::from_tensors(weights, DType::F32, device);
        let varmap = VarMap::new();
        let model = build_model(config, vb, &varmap, lora.as_ref(), device)?;
        let special_tokens = tokenizer.special_tokens(Some(config))?;
        Ok(Self {
            model,
            tokenizer,
            special_tokens,
            varmap,
            lora,
            base_model_name: base_model_name.into(),
        })
    }

    /// Adapter config for saving
    pub fn adapter_config(&self) -> Option<AdapterConfig> {
        self.lora
            .as_ref()
            .map(|lora| AdapterConfig::new(self.base_model_name.clone(), lora.clone()))
    }

    /// Write the adapter into `dir`
    pub fn save_adapter(&self, dir: impl AsRef<Path>) -> Result<()> {
        let config = self
            .adapter_config()
            .ok_or_else(|| Error::LoRA("model has no adapter to save".to_string()))?;
        save_adapter(&self.varmap, &config, dir)
    }

    /// Restore adapter variables from `dir`
    pub fn load_adapter(&self, dir: impl AsRef<Path>) -> Result<()> {
        let (_config, weights) = load_adapter(dir)?;
        apply_adapter_weights(&self.varmap, &weights)?;
        Ok(())
    }

    /// Fold the adapter into the base weights for inference
    pub fn merge_adapters(&mut self) -> Result<()> {
        self.model.merge_adapters()
    }
}

fn build_model(
    config: &LlamaConfig,
    vb: VarBuilder,
    varmap: &VarMap,
    lora: Option<&LoRAConfig>,
    device: &Device,
) -> Result<LlamaForCausalLM> {
    let adapter_vb = VarBuilder::from_varmap(varmap, DType::F32, device);
    LlamaForCausalLM::load(config, vb, lora.map(|l| (l, adapter_vb)))
}

/// Load a base model or an adapter with its base model
///
/// With an adapter, its weights are loaded into trainable variables, so the
/// result can be trained further or merged for inference.
pub fn load_model(name: &str, options: &LoadOptions) -> Result<LoadedModel> {
    let adapter = fetch_adapter(name)?;
    if options.expect_adapter && adapter.is_none() {
        return Err(Error::ModelLoading(format!(
            "{} is marked as an adapter but has no {}",
            name, ADAPTER_CONFIG_FILE
        )));
    }

    let base_name = match &adapter {
        Some(files) => {
            info!(
                "Loading adapter {} on top of {}",
                name, files.config.base_model_name_or_path
            );
            if options.lora.is_some() {
                warn!("Ignoring the configured LoRA settings, the adapter carries its own");
            }
            files.config.base_model_name_or_path.clone()
        }
        None => name.to_string(),
    };

    let files = fetch_model(&base_name)?;
    let dtype = options.resolve_dtype(&files.config);
    info!(
        "Loading {} ({} layers, {} weight files) as {:?} on {:?}",
        base_name,
        files.config.num_hidden_layers,
        files.weights.len(),
        dtype,
        options.device
    );

    let adapter_tokenizer = adapter
        .as_ref()
        .map(|a| a.dir.join(TOKENIZER_FILE))
        .filter(|p| p.is_file());
    let tokenizer_path = adapter_tokenizer
        .or_else(|| files.tokenizer.clone())
        .ok_or_else(|| Error::NotFound(format!("{} for {}", TOKENIZER_FILE, name)))?;
    let tokenizer = HFTokenizerWrapper::from_file(&tokenizer_path)?;

    let lora = match &adapter {
        Some(files) => Some(files.config.lora.clone()),
        None => options.lora.clone(),
    };
    if let Some(lora) = &lora {
        lora.validate()?;
    }

    let vb = load_weights(&files.weights, dtype, &options.device)?;
    let varmap = VarMap::new();
    let model = build_model(&files.config, vb, &varmap, lora.as_ref(), &options.device)?;

    if let Some(adapter) = &adapter {
        let (_config, weights) = load_adapter(&adapter.dir)?;
        let count = apply_adapter_weights(&varmap, &weights)?;
        info!("Restored {} adapter tensors from {}", count, adapter.dir.display());
    }

    let special_tokens = tokenizer.special_tokens(Some(&files.config))?;

    Ok(LoadedModel {
        model,
        tokenizer,
        special_tokens,
        varmap,
        lora,
        base_model_name: base_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llama::random_weights;
    use crate::tokenizer::tests::word_level;
    use candle_core::Tensor;
    use instruct_ner_core::traits::model::CausalLm;

    const WORDS: [&str; 13] = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m"];

    fn write_base_model(dir: &Path) -> LlamaConfig {
        let config = LlamaConfig::tiny(16);
        std::fs::write(dir.join(CONFIG_FILE), serde_json::to_string(&config).unwrap()).unwrap();
        let weights = random_weights(&config, &Device::Cpu).unwrap();
        candle_core::safetensors::save(&weights, dir.join(SAFETENSORS_FILE)).unwrap();
        word_level(&WORDS).save(dir).unwrap();
        config
    }

    fn logits_for(model: &LlamaForCausalLM, tokens: &[u32]) -> Vec<f32> {
        let mut cache = model.new_cache().unwrap();
        model.forward_step(tokens, &mut cache).unwrap()
    }

    #[test]
    fn test_fetch_local_model() {
        let dir = tempfile::tempdir().unwrap();
        write_base_model(dir.path());

        let files = fetch_model(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(files.weights.len(), 1);
        assert!(files.tokenizer.is_some());
        assert_eq!(files.config.vocab_size, 16);
        assert!(fetch_adapter(&dir.path().to_string_lossy()).unwrap().is_none());
    }

    #[test]
    fn test_shard_files() {
        let dir = tempfile::tempdir().unwrap();
        let index = serde_json::json!({
            "metadata": {"total_size": 10},
            "weight_map": {
                "lm_head.weight": "model-00002-of-00002.safetensors",
                "model.embed_tokens.weight": "model-00001-of-00002.safetensors",
                "model.norm.weight": "model-00002-of-00002.safetensors"
            }
        });
        let path = dir.path().join(SAFETENSORS_INDEX_FILE);
        std::fs::write(&path, index.to_string()).unwrap();
        assert_eq!(
            shard_files(&path).unwrap(),
            vec!["model-00001-of-00002.safetensors", "model-00002-of-00002.safetensors"]
        );
    }

    #[test]
    fn test_adapter_round_trip_through_loader() {
        let base_dir = tempfile::tempdir().unwrap();
        let adapter_dir = tempfile::tempdir().unwrap();
        write_base_model(base_dir.path());
        let base_name = base_dir.path().to_string_lossy().to_string();

        let lora = LoRAConfig::new(2, 4.0).with_target_modules(["q_proj", "v_proj"]);
        let trained = load_model(&base_name, &LoadOptions::new(Device::Cpu).with_lora(lora)).unwrap();
        assert_eq!(trained.special_tokens, SpecialTokens::default());
        for (name, var) in trained.varmap.data().lock().unwrap().iter() {
            if name.ends_with("lora_B.weight") {
                var.set(&Tensor::ones(var.shape(), DType::F32, &Device::Cpu).unwrap()).unwrap();
            }
        }
        trained.save_adapter(adapter_dir.path()).unwrap();

        let adapter_name = adapter_dir.path().to_string_lossy().to_string();
        let adapter = fetch_adapter(&adapter_name).unwrap().unwrap();
        assert_eq!(adapter.config.base_model_name_or_path, base_name);

        let options = LoadOptions::new(Device::Cpu).with_expect_adapter(true);
        let mut restored = load_model(&adapter_name, &options).unwrap();
        let tokens = [1u32, 4, 5, 6];
        let expected = logits_for(&trained.model, &tokens);
        for (a, b) in expected.iter().zip(&logits_for(&restored.model, &tokens)) {
            assert!((a - b).abs() < 1e-5);
        }

        restored.merge_adapters().unwrap();
        let merged = logits_for(&restored.model, &tokens);
        for (a, b) in expected.iter().zip(&merged) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_expect_adapter_on_base_model() {
        let dir = tempfile::tempdir().unwrap();
        write_base_model(dir.path());
        let options = LoadOptions::new(Device::Cpu).with_expect_adapter(true);
        assert!(matches!(
            load_model(&dir.path().to_string_lossy(), &options),
            Err(Error::ModelLoading(_))
        ));
    }

    #[test]
    fn test_save_without_adapter() {
        let config = LlamaConfig::tiny(16);
        let weights = random_weights(&config, &Device::Cpu).unwrap();
        let loaded = LoadedModel::from_parts(&config, weights, word_level(&WORDS), None, "tiny", &Device::Cpu).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(loaded.save_adapter(dir.path()), Err(Error::LoRA(_))));
    }
}
