// Training agent - configures a PPO or recurrent PPO trainer, wires the
// callbacks and persists everything a run produces.

pub mod config;
pub mod plot;

pub use config::{AgentOptions, AgentPaths, Device};
pub use plot::plot_results;

use std::fs;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::env::monitor::{load_results, Monitor};
use crate::env::vec_env::{DummyVecEnv, VecEnvironment};
use crate::env::{check_env, Environment};
use crate::error::TrainError;
use crate::trainers::callbacks::{
    CallbackList, CheckpointCallback, HParamCallback, SaveBestModelCallback, CHECKPOINT_PREFIX,
};
use crate::trainers::config::ModelConfig;
use crate::trainers::stats::MetricsLogger;
use crate::trainers::trainer::{BurnTrainerFactory, PolicyTrainer, TrainerFactory};

/// Metric sinks every training run writes to.
pub const LOG_FORMATS: [&str; 4] = ["stdout", "csv", "json", "tensorboard"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOutcome {
    Completed { timesteps: u64 },
    /// The environment failed its pre-training check; nothing was trained.
    EnvCheckFailed { reason: String },
}

pub struct TrainingAgent<F: TrainerFactory = BurnTrainerFactory> {
    id: String,
    paths: AgentPaths,
    options: AgentOptions,
    model_config: ModelConfig,
    device: Device,
    factory: F,
    callbacks: CallbackList,
}

impl TrainingAgent<BurnTrainerFactory> {
    pub fn new(agent_id: &str, log_path: &Path, options: AgentOptions) -> Result<Self, TrainError> {
        Self::with_factory(agent_id, log_path, options, BurnTrainerFactory)
    }
}

impl<F: TrainerFactory> TrainingAgent<F> {
    /// Resolves the configuration and builds the best-model, hyper-parameter and
    /// checkpoint callbacks, run in that order after every env step.
    pub fn with_factory(agent_id: &str, log_path: &Path, options: AgentOptions, factory: F) -> Result<Self, TrainError> {
        let (model_config, device) = options.resolve()?;
        let paths = AgentPaths::new(log_path, agent_id);
        fs::create_dir_all(&paths.root)?;

        let callbacks = CallbackList::new(vec![
            Box::new(SaveBestModelCallback::new(options.summary_freq, &paths.root, agent_id)),
            Box::new(HParamCallback::new()),
            Box::new(CheckpointCallback::new(
                options.summary_freq,
                &paths.checkpoints(),
                CHECKPOINT_PREFIX,
                options.keep_checkpoints,
            )?),
        ]);

        info!(
            "Agent {} uses {} ({}) with the {} encoder on {}",
            agent_id,
            model_config.policy.algorithm_name(),
            model_config.policy.head_name(),
            model_config.encoder.kind,
            device
        );
        Ok(Self {
            id: agent_id.to_string(),
            paths,
            options,
            model_config,
            device,
            factory,
            callbacks,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn callbacks(&self) -> &CallbackList {
        &self.callbacks
    }

    /// Builds a trainer for `env`, with the feature extractor frozen unless the
    /// encoder is trained.
    pub fn build_trainer(&self, env: &dyn VecEnvironment) -> Result<Box<dyn PolicyTrainer>, TrainError> {
        let mut trainer = self.factory.build(&self.model_config, env)?;
        if !self.options.train_encoder {
            trainer.freeze_features_extractor();
        }
        Ok(trainer)
    }

    /// Trains for `episodes` episodes' worth of steps.
    ///
    /// The environment is borrowed and left open.
    pub fn train<E: Environment + ?Sized>(&mut self, env: &mut E, episodes: u64) -> Result<TrainOutcome, TrainError> {
        let steps = env.steps_from_episodes(episodes)?;
        let mut monitored = Monitor::new(&mut *env, &self.paths.root, None)?;

        if let Err(err) = check_env(&mut monitored) {
            error!("Failed training env check: {}", err);
            return Ok(TrainOutcome::EnvCheckFailed {
                reason: err.to_string(),
            });
        }

        let mut envs = DummyVecEnv::single(monitored, Some(self.model_config.seed));
        let logger = MetricsLogger::configure(&self.paths.root, &LOG_FORMATS, &self.id)?;
        let mut trainer = self.build_trainer(&envs)?;
        trainer.set_logger(logger);

        self.write_model_properties(trainer.as_ref(), steps)?;
        let requires_grad: String = trainer
            .features_extractor_requires_grad()
            .iter()
            .map(|&g| if g { "True" } else { "False" })
            .collect();
        info!("Features Extractor Grad: {}", requires_grad);
        info!("Training the agent");
        debug!("{}", trainer.describe());

        trainer.learn(&mut envs, steps, &mut self.callbacks)?;

        trainer.save(&self.paths.model())?;
        trainer.save_encoder_policy_network(&self.paths.model_snapshots())?;
        drop(trainer);
        drop(envs);

        self.plot_rewards()?;
        info!("Agent {} finished training after {} steps", self.id, steps);
        Ok(TrainOutcome::Completed { timesteps: steps })
    }

    fn write_model_properties(&self, trainer: &dyn PolicyTrainer, steps: u64) -> Result<(), TrainError> {
        let hyperparameters = serde_json::to_string_pretty(&trainer.hyperparameters())?;
        let contents = format!(
            "{}\n\nTotal timesteps: {}\nTrain encoder: {}\nHyper-parameters: {}\n",
            trainer.describe(),
            steps,
            self.options.train_encoder,
            hyperparameters
        );
        fs::write(self.paths.model_properties(), contents)?;
        Ok(())
    }

    fn plot_rewards(&self) -> Result<(), TrainError> {
        let results = load_results(&self.paths.root)?;
        if results.rewards.is_empty() {
            warn!("No finished episodes in the monitor log; skipping the reward graph");
            return Ok(());
        }
        fs::create_dir_all(self.paths.plots())?;
        plot_results(&results, &self.paths.reward_plot(&self.id))
    }
}
