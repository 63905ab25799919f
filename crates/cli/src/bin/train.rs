//! Fine-tune a LoRA adapter on an instruction NER corpus
//!
//! ```bash
//! ner-train \
//!   --dataset-name rudrec \
//!   --data-path data/rudrec/rudrec_annotated.json \
//!   --config-file configs/llama_7b_lora.json \
//!   --output-dir models/llama-rudrec \
//!   [--metrics-file models/llama-rudrec/metrics.jsonl]
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use instruct_ner_cli::{dataset_options, init_tracing, open_device};
use instruct_ner_core::config::ExperimentConfig;
use instruct_ner_core::datasets::{load_train_eval, DatasetName};
use instruct_ner_core::error::Device;
use instruct_ner_core::traits::model::ModelType;
use instruct_ner_core::training::{InstructDataset, IntervalStrategy};
use instruct_ner_inference::{LoggingCallback, LoraTrainer, MetricsJsonCallback, ProgressCallback};
use instruct_ner_models::{load_model, LoadOptions};
use instruct_ner_utils::io::format_bytes;
use std::path::PathBuf;
use tracing::{info, warn};

/// Fine-tune a LoRA adapter for instruction NER
#[derive(Parser, Debug)]
#[command(name = "ner-train", about = "Fine-tune a LoRA adapter for instruction NER", long_about = None)]
struct Args {
    /// Corpus: rudrec, nerel, nerel_bio, conll2003 or multiconer2023
    #[arg(long, default_value = "rudrec")]
    dataset_name: DatasetName,

    /// Corpus file or directory
    #[arg(long, value_name = "PATH", default_value = "data/rudrec/rudrec_annotated.json")]
    data_path: PathBuf,

    /// Where checkpoints and the final adapter are written
    #[arg(long, value_name = "PATH", default_value = "models/")]
    output_dir: String,

    /// Held-out fraction for corpora without an evaluation split
    #[arg(long, default_value_t = 0.3)]
    test_size: f64,

    /// Seed for splitting, shuffling and dropout
    #[arg(long, default_value_t = 42)]
    random_seed: u64,

    /// Experiment config
    #[arg(long, value_name = "PATH", default_value = "configs/llama_7b_lora.json")]
    config_file: PathBuf,

    /// llama or llama2
    #[arg(long, default_value = "llama")]
    model_type: ModelType,

    /// Accepted for compatibility; the standard attention kernel is always used
    #[arg(long)]
    use_flash_attention: bool,

    /// Train on the coarse MultiCoNER tagset
    #[arg(long)]
    coarse_tagset_multiconer: bool,

    /// Keep at most this many instructions per split, -1 for all
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    max_instances: i64,

    /// Split NEREL-BIO documents into this many chunks, -1 to keep them whole
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    text_n_splits: i64,

    /// cpu, cuda, cuda:N or metal
    #[arg(long, default_value = "cpu")]
    device: Device,

    /// Also write training metrics to this JSONL file
    #[arg(long, value_name = "PATH")]
    metrics_file: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if args.use_flash_attention {
        warn!("Flash attention is not available, using the standard attention kernel");
    }
    let device = open_device(args.device, args.random_seed)?;

    let options = dataset_options(
        &args.data_path,
        args.max_instances,
        args.text_n_splits,
        args.coarse_tagset_multiconer,
        args.random_seed,
    )
    .with_test_size(args.test_size);
    let (train_instructions, eval_instructions) = load_train_eval(args.dataset_name, &options)
        .with_context(|| format!("Failed to load {} from {}", args.dataset_name, args.data_path.display()))?;

    let mut config = ExperimentConfig::from_file(&args.config_file)
        .with_context(|| format!("Failed to load config {}", args.config_file.display()))?;
    config.trainer.output_dir = args.output_dir.clone();
    config.trainer.seed = args.random_seed;
    config.trainer.save_total_limit = Some(1);
    if config.trainer.evaluation_strategy == IntervalStrategy::No {
        warn!("No evaluation strategy configured, the last adapter is kept instead of the best one");
    } else {
        config.trainer.load_best_model_at_end = true;
    }
    config.trainer.validate().context("Invalid trainer settings")?;

    let mut load_options = LoadOptions::new(device).with_expect_adapter(config.is_adapter);
    if !config.is_adapter {
        load_options = load_options.with_lora(config.lora.clone());
    }
    let loaded = load_model(&config.model_name, &load_options)
        .with_context(|| format!("Failed to load model {}", config.model_name))?;
    info!(
        bos = ?loaded.special_tokens.bos,
        eos = loaded.special_tokens.eos,
        pad = loaded.special_tokens.pad,
        "Special tokens"
    );

    let settings = config.tokenization();
    let train_set = InstructDataset::new(&train_instructions, &loaded.tokenizer, &settings, &loaded.special_tokens)
        .context("Failed to tokenize the training set")?;
    let eval_set = InstructDataset::new(&eval_instructions, &loaded.tokenizer, &settings, &loaded.special_tokens)
        .context("Failed to tokenize the evaluation set")?;
    info!(
        "Tokenized {} training and {} evaluation records ({} supervised training tokens)",
        train_set.len(),
        eval_set.len(),
        train_set.num_supervised_tokens()
    );

    let count = loaded.model.print_trainable_parameters();
    info!(
        "Adapter size {}, base size {}",
        format_bytes(count.trainable as u64 * 4),
        format_bytes(count.total as u64 * loaded.model.dtype().size_in_bytes() as u64)
    );

    let mut trainer = LoraTrainer::new(&loaded, config.trainer.clone())?.with_callback(LoggingCallback);
    if !args.quiet {
        trainer = trainer.with_callback(ProgressCallback::new());
    }
    if let Some(path) = &args.metrics_file {
        let metrics = MetricsJsonCallback::new(path)
            .with_context(|| format!("Failed to create metrics file {}", path.display()))?
            .with_run_name(format!("{}-{}", args.model_type, args.dataset_name));
        trainer = trainer.with_callback(metrics);
    }

    let eval_set = (!eval_set.is_empty()).then_some(&eval_set);
    let state = trainer.train(&train_set, eval_set).context("Training failed")?;
    state
        .save(&args.output_dir)
        .with_context(|| format!("Failed to save trainer state to {}", args.output_dir))?;

    info!(
        "Finished after {} steps, best eval loss {:?}, adapter saved to {}",
        state.global_step, state.best_metric, args.output_dir
    );
    Ok(())
}
