//! LoRA fine-tuning loop
//!
//! [`LoraTrainer`] runs AdamW over the adapter variables of a
//! [`LoadedModel`], with gradient accumulation, norm clipping, an HF-style
//! learning rate schedule, periodic evaluation and rotating checkpoints:
//!
//! ```text
//! output_dir/
//!   checkpoint-50/
//!     adapter_model/{adapter_config.json, adapter_model.safetensors}
//!     trainer_state.json
//!   adapter_config.json
//!   adapter_model.safetensors
//!   tokenizer.json
//! ```

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::training::{
    DataBatch, DataCollator, DataLoader, InstructDataset, IntervalStrategy, LogEntry, TrainerArgs, TrainerState,
    TrainingCallback, CHECKPOINT_PREFIX, IGNORE_INDEX,
};
use instruct_ner_models::{masked_cross_entropy, perplexity, LoadedModel, LrScheduleBuilder, ToNerResult};
use instruct_ner_utils::io::write_json_line;
use instruct_ner_utils::progress::ProgressReporter;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Adapter directory inside a checkpoint
pub const ADAPTER_SUBDIR: &str = "adapter_model";

/// Trains the LoRA adapter of a loaded model
pub struct LoraTrainer<'a> {
    loaded: &'a LoadedModel,
    args: TrainerArgs,
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

#[derive(Default)]
struct LossWindow {
    sum: f32,
    count: usize,
    grad_norm: Option<f32>,
}

impl LossWindow {
    fn push(&mut self, loss: f32) {
        self.sum += loss;
        self.count += 1;
    }

    fn take(&mut self) -> Option<f32> {
        let mean = (self.count > 0).then(|| self.sum / self.count as f32);
        self.sum = 0.0;
        self.count = 0;
        mean
    }
}

impl<'a> LoraTrainer<'a> {
    /// Create a trainer; the model must carry an adapter
    pub fn new(loaded: &'a LoadedModel, args: TrainerArgs) -> Result<Self> {
        args.validate()?;
        if loaded.lora.is_none() || loaded.varmap.all_vars().is_empty() {
            return Err(Error::Training("model has no trainable adapter".to_string()));
        }
        Ok(Self {
            loaded,
            args,
            callbacks: Vec::new(),
        })
    }

    /// Add a callback
    pub fn with_callback(mut self, callback: impl TrainingCallback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Training arguments
    pub fn args(&self) -> &TrainerArgs {
        &self.args
    }

    fn collator(&self) -> DataCollator {
        DataCollator::new(self.loaded.special_tokens.pad)
    }

    fn batch_loss(&self, batch: &DataBatch, train: bool) -> Result<Tensor> {
        let device = self.loaded.model.device();
        let input_ids = Tensor::from_vec(batch.input_ids.clone(), (batch.batch_size, batch.seq_len), device)
            .ner_training()?;
        let logits = self.loaded.model.forward_train(&input_ids, train)?;
        masked_cross_entropy(&logits, &batch.labels, IGNORE_INDEX)
    }

    /// Mean loss over `dataset`, weighted by batch size
    pub fn evaluate(&self, dataset: &InstructDataset) -> Result<f32> {
        let mut loader = DataLoader::new(dataset, self.collator(), self.args.per_device_eval_batch_size);
        let mut total = 0f64;
        let mut examples = 0usize;
        while let Some(batch) = loader.next_batch() {
            let batch = batch?;
            if batch.num_supervised() == 0 {
                continue;
            }
            let loss = self.batch_loss(&batch, false)?.to_scalar::<f32>().ner_training()?;
            total += loss as f64 * batch.len() as f64;
            examples += batch.len();
        }
        if examples == 0 {
            return Err(Error::Dataset("evaluation set has no supervised tokens".to_string()));
        }
        Ok((total / examples as f64) as f32)
    }

    /// Train on `train_set`, evaluating on `eval_set` per the strategy
    pub fn train(&mut self, train_set: &InstructDataset, eval_set: Option<&InstructDataset>) -> Result<TrainerState> {
        if train_set.is_empty() {
            return Err(Error::Dataset("training set is empty".to_string()));
        }
        if self.args.evaluation_strategy != IntervalStrategy::No && eval_set.is_none() {
            return Err(Error::Configuration(
                "an evaluation strategy is set but no evaluation set was given".to_string(),
            ));
        }

        let args = self.args.clone();
        let mut loader =
            DataLoader::new(train_set, self.collator(), args.per_device_train_batch_size).with_shuffle(args.seed);
        let num_batches = loader.num_batches();
        let total_steps = args.total_steps(num_batches);
        let warmup_steps = args.num_warmup_steps(total_steps);
        let schedule =
            LrScheduleBuilder::from_name(&args.lr_scheduler_type, warmup_steps, total_steps, args.learning_rate)?
                .build();

        let vars = self.loaded.varmap.all_vars();
        let params = ParamsAdamW {
            lr: schedule.get_lr(0),
            beta1: args.adam_beta1,
            beta2: args.adam_beta2,
            eps: args.adam_epsilon,
            weight_decay: args.weight_decay,
        };
        let mut optimizer = AdamW::new(vars.clone(), params).ner_training()?;

        let mut state = TrainerState {
            max_steps: total_steps,
            num_train_epochs: args.num_train_epochs,
            ..Default::default()
        };
        info!(
            "Training on {} examples: {} batches per epoch, {} optimizer steps, {} warmup",
            train_set.len(),
            num_batches,
            total_steps,
            warmup_steps
        );
        for callback in &self.callbacks {
            callback.on_train_begin(&args, &state);
        }

        let output_dir = PathBuf::from(&args.output_dir);
        let mut checkpoints: Vec<PathBuf> = Vec::new();
        let mut last_eval: Option<(usize, bool)> = None;
        let mut window = LossWindow::default();
        let mut epoch = 0usize;

        while state.global_step < total_steps {
            let mut accumulated: Option<GradStore> = None;
            let mut micro_batches = 0usize;
            let mut batches_seen = 0usize;
            let first_step = state.global_step;

            while let Some(batch) = loader.next_batch() {
                let batch = batch?;
                batches_seen += 1;
                if batch.num_supervised() == 0 {
                    warn!("Skipping a batch without supervised tokens: {:?}", batch.example_ids);
                } else {
                    let loss = self.batch_loss(&batch, true)?;
                    window.push(loss.to_scalar::<f32>().ner_training()?);
                    let grads = loss.backward().ner_training()?;
                    accumulate(&mut accumulated, grads, &vars)?;
                    micro_batches += 1;
                }

                let boundary = batches_seen % args.gradient_accumulation_steps == 0 || loader.is_finished();
                if !boundary {
                    continue;
                }
                let Some(mut grads) = accumulated.take() else {
                    continue;
                };

                let grad_norm = finish_gradients(&mut grads, &vars, micro_batches, args.max_grad_norm)?;
                let learning_rate = optimizer.learning_rate();
                optimizer.step(&grads).ner_training()?;
                micro_batches = 0;

                state.global_step += 1;
                state.epoch = epoch as f32 + batches_seen as f32 / num_batches as f32;
                optimizer.set_learning_rate(schedule.get_lr(state.global_step));
                window.grad_norm = Some(grad_norm);
                for callback in &self.callbacks {
                    callback.on_step_end(&state);
                }

                if args.logging_steps > 0 && state.global_step % args.logging_steps == 0 {
                    self.log(&mut state, &mut window, learning_rate);
                }
                if args.evaluation_strategy == IntervalStrategy::Steps && state.global_step % args.eval_interval() == 0
                {
                    if let Some(eval_set) = eval_set {
                        last_eval = Some(self.run_evaluation(&mut state, eval_set)?);
                    }
                }
                if args.save_strategy == IntervalStrategy::Steps
                    && args.save_steps > 0
                    && state.global_step % args.save_steps == 0
                {
                    self.save_checkpoint(&output_dir, &mut state, &mut checkpoints, last_eval)?;
                }

                if state.global_step >= total_steps {
                    break;
                }
            }

            if state.global_step == first_step {
                return Err(Error::Dataset("no training batch has supervised tokens".to_string()));
            }

            if args.evaluation_strategy == IntervalStrategy::Epoch {
                if let Some(eval_set) = eval_set {
                    last_eval = Some(self.run_evaluation(&mut state, eval_set)?);
                }
            }
            if args.save_strategy == IntervalStrategy::Epoch {
                self.save_checkpoint(&output_dir, &mut state, &mut checkpoints, last_eval)?;
            }

            epoch += 1;
            loader.reset();
        }

        if window.count > 0 {
            self.log(&mut state, &mut window, optimizer.learning_rate());
        }

        if args.load_best_model_at_end {
            match &state.best_model_checkpoint {
                Some(best) => {
                    info!("Loading best adapter from {} (eval_loss {:?})", best, state.best_metric);
                    self.loaded.load_adapter(Path::new(best).join(ADAPTER_SUBDIR))?;
                }
                None => warn!("No checkpoint recorded a best evaluation loss, keeping the last adapter"),
            }
        }

        self.loaded.save_adapter(&output_dir)?;
        self.loaded.tokenizer.save(&output_dir)?;
        info!("Saved adapter and tokenizer to {}", output_dir.display());

        for callback in &self.callbacks {
            callback.on_train_end(&state);
        }
        Ok(state)
    }

    fn log(&self, state: &mut TrainerState, window: &mut LossWindow, learning_rate: f64) {
        let entry = LogEntry {
            step: state.global_step,
            epoch: state.epoch,
            loss: window.take(),
            learning_rate: Some(learning_rate),
            grad_norm: window.grad_norm,
            eval_loss: None,
        };
        state.log_history.push(entry.clone());
        for callback in &self.callbacks {
            callback.on_log(state, &entry);
        }
    }

    fn run_evaluation(&self, state: &mut TrainerState, eval_set: &InstructDataset) -> Result<(usize, bool)> {
        let eval_loss = self.evaluate(eval_set)?;
        let improved = state.update_best(eval_loss);
        state.log_history.push(LogEntry {
            step: state.global_step,
            epoch: state.epoch,
            eval_loss: Some(eval_loss),
            ..Default::default()
        });
        for callback in &self.callbacks {
            callback.on_evaluate(state, eval_loss);
        }
        Ok((state.global_step, improved))
    }

    fn save_checkpoint(
        &self,
        output_dir: &Path,
        state: &mut TrainerState,
        checkpoints: &mut Vec<PathBuf>,
        last_eval: Option<(usize, bool)>,
    ) -> Result<()> {
        let dir = output_dir.join(format!("{}-{}", CHECKPOINT_PREFIX, state.global_step));
        if checkpoints.last() == Some(&dir) {
            return Ok(());
        }
        if last_eval == Some((state.global_step, true)) {
            state.best_model_checkpoint = Some(dir.display().to_string());
        }

        self.loaded.save_adapter(dir.join(ADAPTER_SUBDIR))?;
        state.save(&dir)?;
        checkpoints.push(dir.clone());

        let best = state.best_model_checkpoint.as_ref().map(PathBuf::from);
        for stale in checkpoints_to_delete(checkpoints, best.as_deref(), self.args.save_total_limit) {
            info!("Deleting older checkpoint {}", stale.display());
            std::fs::remove_dir_all(&stale)?;
            checkpoints.retain(|c| c != &stale);
        }

        for callback in &self.callbacks {
            callback.on_save(state, &dir);
        }
        Ok(())
    }
}

fn accumulate(accumulated: &mut Option<GradStore>, grads: GradStore, vars: &[Var]) -> Result<()> {
    let Some(acc) = accumulated.as_mut() else {
        *accumulated = Some(grads);
        return Ok(());
    };
    for var in vars {
        if let Some(grad) = grads.get(var) {
            let sum = match acc.get(var) {
                Some(prev) => prev.add(grad).ner_training()?,
                None => grad.clone(),
            };
            acc.insert(var, sum);
        }
    }
    Ok(())
}

/// Average over micro-batches, then clip by global norm
///
/// Returns the norm before clipping.
fn finish_gradients(grads: &mut GradStore, vars: &[Var], micro_batches: usize, max_norm: f64) -> Result<f32> {
    let scale = 1.0 / micro_batches.max(1) as f64;
    let mut squared = 0f32;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            let grad = (grad * scale).ner_training()?;
            squared += grad.sqr().and_then(|g| g.sum_all()).and_then(|s| s.to_scalar::<f32>()).ner_training()?;
            grads.insert(var, grad);
        }
    }

    let norm = squared.sqrt();
    if max_norm > 0.0 && norm as f64 > max_norm {
        let clip = max_norm / (norm as f64 + 1e-6);
        for var in vars {
            if let Some(grad) = grads.get(var) {
                let grad = (grad * clip).ner_training()?;
                grads.insert(var, grad);
            }
        }
    }
    Ok(norm)
}

/// Checkpoints beyond `limit`, oldest first, never the best one
///
/// With a limit of one and a best checkpoint that is not the latest, two
/// are kept so training can still resume from the latest.
pub fn checkpoints_to_delete(checkpoints: &[PathBuf], best: Option<&Path>, limit: Option<usize>) -> Vec<PathBuf> {
    let Some(limit) = limit else {
        return Vec::new();
    };
    let mut keep = limit.max(1);
    let latest = checkpoints.last().map(PathBuf::as_path);
    if keep == 1 && best.is_some() && best != latest {
        keep = 2;
    }
    let excess = checkpoints.len().saturating_sub(keep);
    checkpoints
        .iter()
        .filter(|c| Some(c.as_path()) != best)
        .take(excess)
        .cloned()
        .collect()
}

/// Logs training events through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl TrainingCallback for LoggingCallback {
    fn on_train_begin(&self, args: &TrainerArgs, state: &TrainerState) {
        info!(
            max_steps = state.max_steps,
            epochs = state.num_train_epochs,
            learning_rate = args.learning_rate,
            "Training started"
        );
    }

    fn on_log(&self, _state: &TrainerState, entry: &LogEntry) {
        info!(
            step = entry.step,
            epoch = entry.epoch,
            loss = entry.loss,
            learning_rate = entry.learning_rate,
            grad_norm = entry.grad_norm,
            "Training step"
        );
    }

    fn on_evaluate(&self, state: &TrainerState, eval_loss: f32) {
        info!(
            step = state.global_step,
            eval_loss = eval_loss,
            perplexity = perplexity(eval_loss),
            "Evaluation"
        );
    }

    fn on_save(&self, _state: &TrainerState, checkpoint_dir: &Path) {
        info!(path = %checkpoint_dir.display(), "Checkpoint saved");
    }

    fn on_train_end(&self, state: &TrainerState) {
        info!(
            global_step = state.global_step,
            best_metric = state.best_metric,
            "Training complete"
        );
    }
}

/// Progress bar over optimizer steps
#[derive(Default)]
pub struct ProgressCallback {
    reporter: Mutex<Option<ProgressReporter>>,
}

impl ProgressCallback {
    /// Create a progress callback; the bar appears when training starts
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrainingCallback for ProgressCallback {
    fn on_train_begin(&self, _args: &TrainerArgs, state: &TrainerState) {
        if let Ok(mut reporter) = self.reporter.lock() {
            *reporter = Some(ProgressReporter::new("train", state.max_steps));
        }
    }

    fn on_step_end(&self, state: &TrainerState) {
        if let Ok(reporter) = self.reporter.lock() {
            if let Some(reporter) = reporter.as_ref() {
                reporter.set(state.global_step);
            }
        }
    }

    fn on_log(&self, _state: &TrainerState, entry: &LogEntry) {
        if let (Ok(reporter), Some(loss)) = (self.reporter.lock(), entry.loss) {
            if let Some(reporter) = reporter.as_ref() {
                reporter.set_message(format!("loss: {:.4}", loss));
            }
        }
    }

    fn on_train_end(&self, _state: &TrainerState) {
        if let Ok(mut reporter) = self.reporter.lock() {
            if let Some(reporter) = reporter.take() {
                reporter.finish("Training complete!");
            }
        }
    }
}

/// Writes training events to a JSONL file
///
/// One JSON object per line, each with an RFC 3339 timestamp:
///
/// ```json
/// {"event": "train_start", "timestamp": "2024-12-31T12:00:00+00:00", "config": {...}}
/// {"step": 10, "epoch": 0.4, "loss": 2.5, "learning_rate": 0.0003, "timestamp": "..."}
/// {"event": "evaluate", "step": 50, "eval_loss": 1.9, "perplexity": 6.7, "timestamp": "..."}
/// ```
pub struct MetricsJsonCallback {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    run_name: Option<String>,
}

impl MetricsJsonCallback {
    /// Create the file, truncating an existing one
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
            run_name: None,
        })
    }

    /// Tag the run
    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    /// Path of the metrics file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_entry(&self, mut entry: serde_json::Value, flush: bool) {
        entry["timestamp"] = json!(chrono::Utc::now().to_rfc3339());
        if let Ok(mut writer) = self.writer.lock() {
            let written = write_json_line(&mut *writer, &entry);
            if let Err(e) = written.and_then(|_| if flush { writer.flush() } else { Ok(()) }) {
                warn!("Failed to write {}: {}", self.path.display(), e);
            }
        }
    }
}

impl TrainingCallback for MetricsJsonCallback {
    fn on_train_begin(&self, args: &TrainerArgs, state: &TrainerState) {
        let mut entry = json!({
            "event": "train_start",
            "max_steps": state.max_steps,
            "config": args,
        });
        if let Some(name) = &self.run_name {
            entry["run_name"] = json!(name);
        }
        self.write_entry(entry, true);
    }

    fn on_log(&self, _state: &TrainerState, entry: &LogEntry) {
        let value = serde_json::to_value(entry).unwrap_or_else(|_| json!({"step": entry.step}));
        self.write_entry(value, entry.step % 10 == 0);
    }

    fn on_evaluate(&self, state: &TrainerState, eval_loss: f32) {
        self.write_entry(
            json!({
                "event": "evaluate",
                "step": state.global_step,
                "epoch": state.epoch,
                "eval_loss": eval_loss,
                "perplexity": perplexity(eval_loss),
            }),
            true,
        );
    }

    fn on_save(&self, state: &TrainerState, checkpoint_dir: &Path) {
        self.write_entry(
            json!({
                "event": "checkpoint_saved",
                "step": state.global_step,
                "path": checkpoint_dir.display().to_string(),
            }),
            true,
        );
    }

    fn on_train_end(&self, state: &TrainerState) {
        self.write_entry(
            json!({
                "event": "train_end",
                "global_step": state.global_step,
                "best_metric": state.best_metric,
                "best_model_checkpoint": state.best_model_checkpoint,
            }),
            true,
        );
    }
}
