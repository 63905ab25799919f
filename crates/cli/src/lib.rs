//! Setup shared by the `ner-train`, `ner-infer` and `ner-evaluate` binaries

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use instruct_ner_core::datasets::{DatasetName, DatasetOptions};
use instruct_ner_core::error::Device;
use instruct_ner_models::to_candle_device;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, `info` unless `RUST_LOG` says otherwise
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Map the `-1 means unlimited` convention of count flags
pub fn optional_count(value: i64) -> Option<usize> {
    usize::try_from(value).ok()
}

/// Open the candle device and seed it where the backend allows
pub fn open_device(device: Device, seed: u64) -> Result<candle_core::Device> {
    let candle_device = to_candle_device(&device).with_context(|| format!("Failed to open device {}", device))?;
    if let Err(e) = candle_device.set_seed(seed) {
        debug!("{} does not take a seed: {}", device, e);
    }
    Ok(candle_device)
}

/// Corpus options from the common dataset flags
pub fn dataset_options(
    data_path: &Path,
    max_instances: i64,
    text_n_splits: i64,
    coarse_tagset: bool,
    seed: u64,
) -> DatasetOptions {
    DatasetOptions::new(data_path)
        .with_max_instances(optional_count(max_instances))
        .with_text_n_splits(optional_count(text_n_splits))
        .with_coarse_tagset(coarse_tagset)
        .with_seed(seed)
}

/// Entity types scored for a corpus
pub fn entity_types(name: DatasetName, coarse_tagset: bool) -> Vec<String> {
    name.entity_types(coarse_tagset).iter().map(|t| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_count() {
        assert_eq!(optional_count(-1), None);
        assert_eq!(optional_count(0), Some(0));
        assert_eq!(optional_count(25), Some(25));
    }

    #[test]
    fn test_dataset_options() {
        let options = dataset_options(Path::new("data/nerel"), 100, -1, true, 7);
        assert_eq!(options.max_instances, Some(100));
        assert_eq!(options.text_n_splits, None);
        assert!(options.coarse_tagset);
        assert_eq!(options.seed, 7);
        assert_eq!(options.test_size, 0.3);
    }

    #[test]
    fn test_open_cpu_device() {
        assert!(open_device(Device::Cpu, 42).unwrap().is_cpu());
    }

    #[test]
    fn test_entity_types() {
        assert_eq!(entity_types(DatasetName::Rudrec, false).len(), 6);
    }
}
