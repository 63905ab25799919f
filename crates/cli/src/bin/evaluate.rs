//! Score a prediction file and print the metrics report as JSON

use anyhow::{Context, Result};
use clap::Parser;
use instruct_ner_cli::{entity_types, init_tracing};
use instruct_ner_core::datasets::DatasetName;
use instruct_ner_inference::PredictionTable;
use std::path::PathBuf;
use tracing::info;

/// Score predictions against their targets
#[derive(Parser, Debug)]
#[command(name = "ner-evaluate", about = "Compute precision, recall and F1 for a prediction file", long_about = None)]
struct Args {
    /// Prediction file written by ner-infer
    #[arg(long, value_name = "PATH", default_value = "prediction.json")]
    prediction_path: PathBuf,

    /// Corpus the predictions were made for
    #[arg(long, default_value = "rudrec")]
    dataset_name: DatasetName,

    /// Score the coarse MultiCoNER tagset
    #[arg(long)]
    coarse_tagset_multiconer: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let table = PredictionTable::read_json(&args.prediction_path)
        .with_context(|| format!("Failed to read {}", args.prediction_path.display()))?;
    let report = table.metrics(&entity_types(args.dataset_name, args.coarse_tagset_multiconer));
    info!(
        records = report.num_records,
        micro_f1 = report.micro_f1,
        "Scored {}",
        args.prediction_path.display()
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
