//! Trainer arguments, state and callbacks
//!
//! [`TrainerArgs`] mirrors the subset of HF `TrainingArguments` that the
//! experiment configs use. Keys it does not know are kept in `extra` and
//! reported, never rejected.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the serialized trainer state
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";

/// Prefix of checkpoint directories
pub const CHECKPOINT_PREFIX: &str = "checkpoint";

/// When evaluation or saving happens
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStrategy {
    /// Never
    #[default]
    No,
    /// Every N optimizer steps
    Steps,
    /// At the end of every epoch
    Epoch,
}

/// Training hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerArgs {
    /// Where checkpoints and the final adapter go
    pub output_dir: String,

    /// Number of epochs
    pub num_train_epochs: f32,

    /// Overrides the epoch count when positive
    pub max_steps: i64,

    /// Micro-batch size
    pub per_device_train_batch_size: usize,

    /// Evaluation batch size
    pub per_device_eval_batch_size: usize,

    /// Micro-batches per optimizer step
    pub gradient_accumulation_steps: usize,

    /// Peak learning rate
    pub learning_rate: f64,

    /// AdamW weight decay
    pub weight_decay: f64,

    /// AdamW beta1
    pub adam_beta1: f64,

    /// AdamW beta2
    pub adam_beta2: f64,

    /// AdamW epsilon
    pub adam_epsilon: f64,

    /// Gradient norm clip, disabled when not positive
    pub max_grad_norm: f64,

    /// Warmup steps, takes precedence over `warmup_ratio`
    pub warmup_steps: usize,

    /// Warmup as a fraction of total steps
    pub warmup_ratio: f64,

    /// HF scheduler name
    pub lr_scheduler_type: String,

    /// Log every N steps
    pub logging_steps: usize,

    /// Evaluation schedule
    #[serde(alias = "eval_strategy")]
    pub evaluation_strategy: IntervalStrategy,

    /// Evaluate every N steps, defaults to `logging_steps`
    pub eval_steps: Option<usize>,

    /// Checkpoint schedule
    pub save_strategy: IntervalStrategy,

    /// Save every N steps
    pub save_steps: usize,

    /// Number of checkpoints kept on disk
    pub save_total_limit: Option<usize>,

    /// Restore the best adapter when training ends
    pub load_best_model_at_end: bool,

    /// Random seed for shuffling and dropout
    pub seed: u64,

    /// Keys this trainer does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for TrainerArgs {
    fn default() -> Self {
        Self {
            output_dir: "models/".to_string(),
            num_train_epochs: 3.0,
            max_steps: -1,
            per_device_train_batch_size: 8,
            per_device_eval_batch_size: 8,
            gradient_accumulation_steps: 1,
            learning_rate: 5e-5,
            weight_decay: 0.0,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-8,
            max_grad_norm: 1.0,
            warmup_steps: 0,
            warmup_ratio: 0.0,
            lr_scheduler_type: "linear".to_string(),
            logging_steps: 500,
            evaluation_strategy: IntervalStrategy::No,
            eval_steps: None,
            save_strategy: IntervalStrategy::Steps,
            save_steps: 500,
            save_total_limit: None,
            load_best_model_at_end: false,
            seed: 42,
            extra: BTreeMap::new(),
        }
    }
}

impl TrainerArgs {
    /// Set output directory
    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.per_device_train_batch_size = batch_size;
        self
    }

    /// Set number of epochs
    pub fn with_num_epochs(mut self, num_epochs: f32) -> Self {
        self.num_train_epochs = num_epochs;
        self
    }

    /// Set seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Optimizer steps per epoch for a loader of `num_batches` micro-batches
    pub fn steps_per_epoch(&self, num_batches: usize) -> usize {
        num_batches.div_ceil(self.gradient_accumulation_steps.max(1)).max(1)
    }

    /// Total optimizer steps
    pub fn total_steps(&self, num_batches: usize) -> usize {
        if self.max_steps > 0 {
            return self.max_steps as usize;
        }
        (self.num_train_epochs.max(0.0) as f64 * self.steps_per_epoch(num_batches) as f64).ceil() as usize
    }

    /// Warmup steps for a run of `total_steps`
    pub fn num_warmup_steps(&self, total_steps: usize) -> usize {
        if self.warmup_steps > 0 {
            self.warmup_steps
        } else {
            (self.warmup_ratio * total_steps as f64).ceil() as usize
        }
    }

    /// Interval between step-based evaluations
    pub fn eval_interval(&self) -> usize {
        self.eval_steps.unwrap_or(self.logging_steps).max(1)
    }

    /// Check that the arguments describe a runnable schedule
    pub fn validate(&self) -> Result<()> {
        if self.per_device_train_batch_size == 0 {
            return Err(Error::Configuration("per_device_train_batch_size must be positive".to_string()));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(Error::Configuration("gradient_accumulation_steps must be positive".to_string()));
        }
        if self.learning_rate <= 0.0 {
            return Err(Error::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.load_best_model_at_end && self.evaluation_strategy == IntervalStrategy::No {
            return Err(Error::Configuration(
                "load_best_model_at_end requires an evaluation strategy".to_string(),
            ));
        }
        if self.load_best_model_at_end
            && self.evaluation_strategy == IntervalStrategy::Steps
            && self.save_strategy == IntervalStrategy::Steps
            && self.save_steps % self.eval_interval() != 0
        {
            return Err(Error::Configuration(format!(
                "save_steps ({}) must be a multiple of eval_steps ({}) with load_best_model_at_end",
                self.save_steps,
                self.eval_interval()
            )));
        }
        Ok(())
    }
}

/// One entry of the training log
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Optimizer step
    pub step: usize,

    /// Fractional epoch
    pub epoch: f32,

    /// Mean training loss since the previous log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f32>,

    /// Current learning rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,

    /// Gradient norm before clipping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grad_norm: Option<f32>,

    /// Evaluation loss
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_loss: Option<f32>,
}

/// Progress of a training run, saved with every checkpoint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    /// Optimizer steps taken
    pub global_step: usize,

    /// Fractional epoch
    pub epoch: f32,

    /// Planned optimizer steps
    pub max_steps: usize,

    /// Planned epochs
    pub num_train_epochs: f32,

    /// Every log and evaluation entry
    pub log_history: Vec<LogEntry>,

    /// Lowest evaluation loss seen
    pub best_metric: Option<f32>,

    /// Checkpoint directory holding the best adapter
    pub best_model_checkpoint: Option<String>,
}

impl TrainerState {
    /// Record an evaluation loss, returns true if it is the new best
    pub fn update_best(&mut self, eval_loss: f32) -> bool {
        let improved = self.best_metric.map_or(true, |best| eval_loss < best);
        if improved {
            self.best_metric = Some(eval_loss);
        }
        improved
    }

    /// Most recent training loss in the log
    pub fn last_loss(&self) -> Option<f32> {
        self.log_history.iter().rev().find_map(|e| e.loss)
    }

    /// Save as `trainer_state.json` inside `dir`
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        std::fs::create_dir_all(dir.as_ref())?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.as_ref().join(TRAINER_STATE_FILE), content)?;
        Ok(())
    }

    /// Load `trainer_state.json` from `dir`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(TRAINER_STATE_FILE);
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Training progress callback
#[allow(unused_variables)]
pub trait TrainingCallback: Send + Sync {
    /// Called at the start of training
    fn on_train_begin(&self, args: &TrainerArgs, state: &TrainerState) {}

    /// Called after every optimizer step
    fn on_step_end(&self, state: &TrainerState) {}

    /// Called for every log entry
    fn on_log(&self, state: &TrainerState, entry: &LogEntry) {}

    /// Called after an evaluation
    fn on_evaluate(&self, state: &TrainerState, eval_loss: f32) {}

    /// Called after a checkpoint is written
    fn on_save(&self, state: &TrainerState, checkpoint_dir: &Path) {}

    /// Called when training completes
    fn on_train_end(&self, state: &TrainerState) {}
}

/// Null callback that does nothing
#[derive(Debug, Clone, Copy)]
pub struct NullCallback;

impl TrainingCallback for NullCallback {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainer_args_from_config() {
        let json = r#"{
            "evaluation_strategy": "steps",
            "eval_steps": 50,
            "save_steps": 50,
            "per_device_train_batch_size": 4,
            "gradient_accumulation_steps": 32,
            "num_train_epochs": 2,
            "learning_rate": 0.0003,
            "fp16": true,
            "report_to": "wandb"
        }"#;
        let args: TrainerArgs = serde_json::from_str(json).unwrap();
        assert_eq!(args.evaluation_strategy, IntervalStrategy::Steps);
        assert_eq!(args.eval_interval(), 50);
        assert_eq!(args.per_device_train_batch_size, 4);
        assert_eq!(args.learning_rate, 3e-4);
        assert_eq!(args.lr_scheduler_type, "linear");
        assert_eq!(args.extra.len(), 2);
        assert!(args.extra.contains_key("fp16"));
    }

    #[test]
    fn test_eval_strategy_alias() {
        let args: TrainerArgs = serde_json::from_str(r#"{"eval_strategy": "epoch"}"#).unwrap();
        assert_eq!(args.evaluation_strategy, IntervalStrategy::Epoch);
    }

    #[test]
    fn test_step_counts() {
        let mut args = TrainerArgs::default().with_num_epochs(2.0);
        args.gradient_accumulation_steps = 4;
        assert_eq!(args.steps_per_epoch(10), 3);
        assert_eq!(args.total_steps(10), 6);

        args.max_steps = 5;
        assert_eq!(args.total_steps(10), 5);

        args.warmup_ratio = 0.1;
        assert_eq!(args.num_warmup_steps(100), 10);
        args.warmup_steps = 3;
        assert_eq!(args.num_warmup_steps(100), 3);
    }

    #[test]
    fn test_validate() {
        assert!(TrainerArgs::default().validate().is_ok());

        let mut args = TrainerArgs::default();
        args.load_best_model_at_end = true;
        assert!(args.validate().is_err());

        args.evaluation_strategy = IntervalStrategy::Steps;
        args.eval_steps = Some(200);
        args.save_steps = 500;
        assert!(args.validate().is_err());

        args.save_steps = 400;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_trainer_state_best_and_io() {
        let mut state = TrainerState::default();
        assert!(state.update_best(1.5));
        assert!(!state.update_best(2.0));
        assert!(state.update_best(1.0));
        assert_eq!(state.best_metric, Some(1.0));

        state.log_history.push(LogEntry {
            step: 10,
            epoch: 0.5,
            loss: Some(0.7),
            ..Default::default()
        });
        state.log_history.push(LogEntry {
            step: 10,
            epoch: 0.5,
            eval_loss: Some(0.9),
            ..Default::default()
        });
        assert_eq!(state.last_loss(), Some(0.7));

        let dir = tempfile::tempdir().unwrap();
        state.save(dir.path()).unwrap();
        assert_eq!(TrainerState::load(dir.path()).unwrap(), state);
    }
}
