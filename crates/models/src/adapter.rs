//! PEFT-compatible adapter files
//!
//! An adapter directory holds `adapter_config.json` and
//! `adapter_model.safetensors`. Tensor names are the full PEFT names, e.g.
//! `base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight`.

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::training::{AdapterConfig, ADAPTER_WEIGHTS_FILE};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Write the adapter variables of `varmap` and `config` into `dir`
pub fn save_adapter(varmap: &VarMap, config: &AdapterConfig, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
    varmap
        .save(&weights_path)
        .map_err(|e| Error::LoRA(format!("failed to write {}: {}", weights_path.display(), e)))?;
    config.save(dir)?;
    debug!("Saved adapter to {}", dir.display());
    Ok(())
}

/// Read an adapter directory
pub fn load_adapter(dir: impl AsRef<Path>) -> Result<(AdapterConfig, HashMap<String, Tensor>)> {
    let dir = dir.as_ref();
    let config = AdapterConfig::from_dir(dir)?;
    let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
    if !weights_path.is_file() {
        return Err(Error::NotFound(weights_path.display().to_string()));
    }
    let weights = candle_core::safetensors::load(&weights_path, &Device::Cpu)
        .map_err(|e| Error::LoRA(format!("failed to read {}: {}", weights_path.display(), e)))?;
    Ok((config, weights))
}

/// Copy saved tensors into the matching variables of `varmap`
///
/// Every variable must have a saved tensor of the same shape. Saved tensors
/// without a variable are skipped with a warning.
pub fn apply_adapter_weights(varmap: &VarMap, weights: &HashMap<String, Tensor>) -> Result<usize> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| Error::LoRA(format!("adapter variables are poisoned: {}", e)))?;

    for (name, var) in data.iter() {
        let saved = weights
            .get(name)
            .ok_or_else(|| Error::LoRA(format!("adapter weights have no tensor '{}'", name)))?;
        if saved.dims() != var.dims() {
            return Err(Error::LoRA(format!(
                "shape mismatch for '{}': saved {:?}, model {:?}",
                name,
                saved.dims(),
                var.dims()
            )));
        }
        saved
            .to_dtype(var.dtype())
            .and_then(|t| t.to_device(var.device()))
            .and_then(|t| var.set(&t))
            .map_err(|e| Error::LoRA(format!("failed to set '{}': {}", name, e)))?;
    }

    let unused = weights.keys().filter(|k| !data.contains_key(*k)).count();
    if unused > 0 {
        warn!("{} saved adapter tensors have no matching layer", unused);
    }
    Ok(data.len())
}
