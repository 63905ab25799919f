//! Generate answers for a test split and write the prediction file
//!
//! ```bash
//! ner-infer \
//!   --dataset-name rudrec \
//!   --data-path data/rudrec/rudrec_annotated.json \
//!   --model-name poteminr/llama2-rudrec \
//!   --prediction-path prediction.json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use instruct_ner_cli::{dataset_options, entity_types, init_tracing, open_device};
use instruct_ner_core::config::{ExperimentConfig, GenerationConfig};
use instruct_ner_core::datasets::{load_test, DatasetName};
use instruct_ner_core::error::Device;
use instruct_ner_core::ner::AnswerParser;
use instruct_ner_core::traits::model::ModelType;
use instruct_ner_inference::PredictionEngine;
use instruct_ner_models::{load_model, LoadOptions};
use std::path::PathBuf;
use tracing::{info, warn};

/// Run an instruction NER model over a test split
#[derive(Parser, Debug)]
#[command(name = "ner-infer", about = "Predict entities for a test split", long_about = None)]
struct Args {
    /// Corpus: rudrec, nerel, nerel_bio, conll2003 or multiconer2023
    #[arg(long, default_value = "rudrec")]
    dataset_name: DatasetName,

    /// Corpus file or directory
    #[arg(long, value_name = "PATH", default_value = "data/rudrec/rudrec_annotated.json")]
    data_path: PathBuf,

    /// llama or llama2
    #[arg(long, default_value = "llama")]
    model_type: ModelType,

    /// Adapter or full model, as a hub id or local directory
    #[arg(long, default_value = "poteminr/llama2-rudrec")]
    model_name: String,

    /// Experiment config the adapter was trained with
    #[arg(long, value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Where the prediction file is written
    #[arg(long, value_name = "PATH", default_value = "prediction.json")]
    prediction_path: PathBuf,

    /// Keep at most this many test instructions, -1 for all
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    max_instances: i64,

    /// Split NEREL-BIO documents into this many chunks, -1 to keep them whole
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    text_n_splits: i64,

    /// Use the coarse MultiCoNER tagset
    #[arg(long)]
    coarse_tagset_multiconer: bool,

    /// Instructions per batch
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// cpu, cuda, cuda:N or metal
    #[arg(long, default_value = "cpu")]
    device: Device,

    /// Seed for sampling and shuffling
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Override the generation length limit
    #[arg(long)]
    max_new_tokens: Option<usize>,

    /// Override the beam count
    #[arg(long)]
    num_beams: Option<usize>,

    /// Decode greedily instead of beam-sampling
    #[arg(long)]
    greedy: bool,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

fn generation_config(args: &Args) -> GenerationConfig {
    let mut generation = if args.greedy {
        GenerationConfig::greedy()
    } else {
        GenerationConfig::default()
    };
    generation = generation.with_seed(args.seed);
    if let Some(max_new_tokens) = args.max_new_tokens {
        generation = generation.with_max_new_tokens(max_new_tokens);
    }
    if let Some(num_beams) = args.num_beams {
        generation = generation.with_num_beams(num_beams);
    }
    generation
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let device = open_device(args.device, args.seed)?;

    let options = dataset_options(
        &args.data_path,
        args.max_instances,
        args.text_n_splits,
        args.coarse_tagset_multiconer,
        args.seed,
    );
    let test = load_test(args.dataset_name, &options)
        .with_context(|| format!("Failed to load {} from {}", args.dataset_name, args.data_path.display()))?;

    let mut loaded = load_model(&args.model_name, &LoadOptions::new(device))
        .with_context(|| format!("Failed to load model {}", args.model_name))?;

    if let Some(path) = &args.config_file {
        let config = ExperimentConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
        match &loaded.lora {
            Some(lora) if *lora != config.lora => {
                warn!("The adapter's own LoRA settings differ from {}, using the adapter's", path.display())
            }
            None => warn!("{} is not an adapter, ignoring the LoRA settings of {}", args.model_name, path.display()),
            _ => {}
        }
    }

    if loaded.model.has_adapters() {
        loaded.merge_adapters().context("Failed to merge the adapter")?;
        info!("Merged adapter into {}", loaded.base_model_name);
    }

    let types = entity_types(args.dataset_name, args.coarse_tagset_multiconer);
    let parser = AnswerParser::new(args.dataset_name.template().answer_separator(), &types);
    let generation = generation_config(&args);
    info!(
        model_type = %args.model_type,
        num_beams = generation.num_beams,
        do_sample = generation.do_sample,
        max_new_tokens = generation.max_new_tokens,
        "Generating for {} instructions",
        test.len()
    );

    let engine = PredictionEngine::new(&loaded.model, &loaded.tokenizer, loaded.special_tokens, generation, parser)?
        .with_progress(!args.quiet);
    let table = engine.predict(&test, args.batch_size).context("Prediction failed")?;
    table
        .write_json(&args.prediction_path)
        .with_context(|| format!("Failed to write {}", args.prediction_path.display()))?;

    let report = table.metrics(&types);
    info!(
        micro_f1 = report.micro_f1,
        macro_f1 = report.macro_f1,
        "Wrote {} predictions to {}",
        table.len(),
        args.prediction_path.display()
    );
    Ok(())
}
