// Training callbacks - invoked by the trainer at start, after every env step and at the end.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::env::monitor::load_results;
use crate::error::TrainError;
use crate::trainers::checkpoint::{CheckpointManager, Checkpointable};
use crate::trainers::stats::{Metrics, MetricsLogger};

/// What a callback sees of the running trainer.
pub struct CallbackContext<'a> {
    pub num_timesteps: u64,
    pub model: &'a dyn Checkpointable,
    pub hyperparameters: &'a serde_json::Value,
    pub logger: Option<&'a mut MetricsLogger>,
}

pub trait Callback {
    fn on_training_start(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<(), TrainError> {
        Ok(())
    }

    /// Called after every env step. Returning `false` stops training.
    fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool, TrainError>;

    fn on_training_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<(), TrainError> {
        Ok(())
    }
}

/// Runs callbacks in order; training continues only while all of them agree.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackList {
    pub fn new(callbacks: Vec<Box<dyn Callback>>) -> Self {
        Self { callbacks }
    }

    pub fn push(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn on_training_start(&mut self, ctx: &mut CallbackContext<'_>) -> Result<(), TrainError> {
        for callback in &mut self.callbacks {
            callback.on_training_start(ctx)?;
        }
        Ok(())
    }

    pub fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool, TrainError> {
        let mut continue_training = true;
        for callback in &mut self.callbacks {
            continue_training &= callback.on_step(ctx)?;
        }
        Ok(continue_training)
    }

    pub fn on_training_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<(), TrainError> {
        for callback in &mut self.callbacks {
            callback.on_training_end(ctx)?;
        }
        Ok(())
    }
}

/// Written next to the best model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestModelSummary {
    pub agent_id: String,
    pub num_timesteps: u64,
    pub episodes: usize,
    pub mean_reward: f32,
    pub saved_at: String,
}

/// Saves the model whenever the mean reward of the last 100 monitored episodes improves.
pub struct SaveBestModelCallback {
    check_freq: u64,
    log_dir: PathBuf,
    agent_id: String,
    best_mean_reward: f32,
    n_calls: u64,
}

pub const BEST_MODEL_NAME: &str = "best_model";
pub const BEST_MODEL_SUMMARY: &str = "best_model_summary.json";

impl SaveBestModelCallback {
    pub fn new(check_freq: u64, log_dir: &Path, agent_id: &str) -> Self {
        Self {
            check_freq: check_freq.max(1),
            log_dir: log_dir.to_path_buf(),
            agent_id: agent_id.to_string(),
            best_mean_reward: f32::NEG_INFINITY,
            n_calls: 0,
        }
    }

    pub fn best_mean_reward(&self) -> f32 {
        self.best_mean_reward
    }

    fn check(&mut self, ctx: &CallbackContext<'_>) -> Result<(), TrainError> {
        let results = load_results(&self.log_dir)?;
        let Some(mean_reward) = results.mean_last(100) else {
            return Ok(());
        };
        info!(
            "Num timesteps: {} - best mean reward: {:.2} - last mean reward per episode: {:.2}",
            ctx.num_timesteps, self.best_mean_reward, mean_reward
        );
        if mean_reward > self.best_mean_reward {
            self.best_mean_reward = mean_reward;
            let path = self.log_dir.join(BEST_MODEL_NAME);
            info!("Saving new best model to {}", path.display());
            ctx.model.save_model(&path)?;

            let summary = BestModelSummary {
                agent_id: self.agent_id.clone(),
                num_timesteps: ctx.num_timesteps,
                episodes: results.rewards.len(),
                mean_reward,
                saved_at: Utc::now().to_rfc3339(),
            };
            fs::write(
                self.log_dir.join(BEST_MODEL_SUMMARY),
                serde_json::to_string_pretty(&summary)?,
            )?;
        }
        Ok(())
    }
}

impl Callback for SaveBestModelCallback {
    fn on_training_start(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<(), TrainError> {
        fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }

    fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool, TrainError> {
        self.n_calls += 1;
        if self.n_calls % self.check_freq == 0 {
            self.check(ctx)?;
        }
        Ok(true)
    }
}

/// Records the hyper-parameters once, with the metrics they are judged by.
#[derive(Default)]
pub struct HParamCallback {
    recorded: bool,
}

impl HParamCallback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Callback for HParamCallback {
    fn on_training_start(&mut self, ctx: &mut CallbackContext<'_>) -> Result<(), TrainError> {
        if self.recorded {
            return Ok(());
        }
        let mut metrics = Metrics::new();
        metrics.insert("rollout/ep_len_mean".into(), 0.0);
        metrics.insert("train/value_loss".into(), 0.0);
        if let Some(logger) = ctx.logger.as_deref_mut() {
            logger.record_hparams(ctx.hyperparameters, &metrics)?;
        }
        debug!("Recorded hyper-parameters: {}", ctx.hyperparameters);
        self.recorded = true;
        Ok(())
    }

    fn on_step(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<bool, TrainError> {
        Ok(true)
    }
}

/// Saves a model and optimizer snapshot every `save_freq` calls.
pub struct CheckpointCallback {
    save_freq: u64,
    manager: CheckpointManager,
    n_calls: u64,
}

pub const CHECKPOINT_PREFIX: &str = "supervised_model";

impl CheckpointCallback {
    pub fn new(save_freq: u64, save_path: &Path, name_prefix: &str, keep_checkpoints: Option<usize>) -> Result<Self, TrainError> {
        Ok(Self {
            save_freq: save_freq.max(1),
            manager: CheckpointManager::new(save_path, name_prefix, keep_checkpoints)?,
            n_calls: 0,
        })
    }

    pub fn manager(&self) -> &CheckpointManager {
        &self.manager
    }
}

impl Callback for CheckpointCallback {
    fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool, TrainError> {
        self.n_calls += 1;
        if self.n_calls % self.save_freq == 0 {
            self.manager.save_checkpoint(ctx.model, ctx.num_timesteps)?;
        }
        Ok(true)
    }
}
