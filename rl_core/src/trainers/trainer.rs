// Trainer trait - the surface the training agent drives, and the factory that builds it.
use std::fs;
use std::path::Path;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::grad_clipping::GradientClippingConfig;
use burn::module::Module;
use burn::optim::{AdamConfig, Optimizer};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::info;

use crate::env::vec_env::VecEnvironment;
use crate::error::{ConfigError, TrainError};
use crate::trainers::callbacks::CallbackList;
use crate::trainers::config::{ModelConfig, PolicyKind};
use crate::trainers::distributions::ActionLayout;
use crate::trainers::encoders::{EncoderKind, FeaturesExtractorConfig};
use crate::trainers::policy::{ActorCriticPolicy, PolicyConfig};
use crate::trainers::ppo::PpoTrainer;
use crate::trainers::stats::MetricsLogger;

pub const FEATURE_EXTRACTOR_FILE: &str = "feature_extractor";
pub const POLICY_NET_FILE: &str = "policy_net";

/// A built model ready to learn.
pub trait PolicyTrainer {
    fn policy_kind(&self) -> PolicyKind;

    fn set_logger(&mut self, logger: MetricsLogger);

    fn freeze_features_extractor(&mut self);

    /// Trainability of every feature-extractor parameter, in layer order.
    fn features_extractor_requires_grad(&self) -> Vec<bool>;

    /// Human-readable layer summary.
    fn describe(&self) -> String;

    fn num_params(&self) -> usize;

    fn hyperparameters(&self) -> serde_json::Value;

    fn learn(
        &mut self,
        env: &mut dyn VecEnvironment,
        total_timesteps: u64,
        callbacks: &mut CallbackList,
    ) -> Result<(), TrainError>;

    /// Saves the whole policy to `<path>.mpk`.
    fn save(&self, path: &Path) -> Result<(), TrainError>;

    /// Saves the feature extractor and the rest of the policy as two files under `dir`.
    fn save_encoder_policy_network(&self, dir: &Path) -> Result<(), TrainError>;
}

pub trait TrainerFactory {
    fn build(&self, config: &ModelConfig, env: &dyn VecEnvironment) -> Result<Box<dyn PolicyTrainer>, TrainError>;
}

pub type TrainingBackend = Autodiff<NdArray>;

/// Builds PPO trainers on the CPU `NdArray` backend with Adam.
#[derive(Debug, Clone, Copy, Default)]
pub struct BurnTrainerFactory;

impl TrainerFactory for BurnTrainerFactory {
    fn build(&self, config: &ModelConfig, env: &dyn VecEnvironment) -> Result<Box<dyn PolicyTrainer>, TrainError> {
        config.validate()?;
        let device = NdArrayDevice::default();
        TrainingBackend::seed(config.seed);

        let observation_shape = env
            .observation_space()
            .hwc()
            .ok_or_else(|| ConfigError::Invalid("observation space is not an HWC image".into()))?;
        let layout = ActionLayout::from_space(env.action_space());
        let hp = &config.hyperparameters;

        let policy_config = PolicyConfig {
            extractor: FeaturesExtractorConfig::new(
                config.encoder.kind,
                observation_shape,
                config.encoder.features_dim(),
            ),
            layout: layout.clone(),
            lstm_hidden_size: config.policy.is_recurrent().then_some(hp.lstm_hidden_size),
            log_std_init: hp.log_std_init,
        };
        let mut policy = policy_config.init::<TrainingBackend>(&device)?;

        let background = config
            .encoder
            .args
            .as_ref()
            .and_then(|args| args.object_background.as_deref());
        if let (EncoderKind::SimClr, Some(dir), Some(background)) =
            (config.encoder.kind, &config.pretrained_encoder_dir, background)
        {
            policy.features_extractor = policy.features_extractor.load_pretrained(dir, background, &device)?;
        }

        let optimizer = AdamConfig::new()
            .with_epsilon(1e-5)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(hp.max_grad_norm)))
            .init::<TrainingBackend, ActorCriticPolicy<TrainingBackend>>();

        info!(
            "Built {} with {} on {:?}",
            config.policy.algorithm_name(),
            config.policy.head_name(),
            device
        );
        Ok(Box::new(PpoTrainer::new(
            policy,
            optimizer,
            config.clone(),
            layout,
            observation_shape,
            hyperparameters(config),
            device,
        )))
    }
}

/// Hyper-parameters as recorded alongside the metrics.
pub fn hyperparameters(config: &ModelConfig) -> serde_json::Value {
    let hp = &config.hyperparameters;
    serde_json::json!({
        "algorithm": config.policy.algorithm_name(),
        "policy": config.policy.head_name(),
        "encoder": config.encoder.kind.class_name(),
        "features_dim": config.encoder.features_dim(),
        "learning_rate": hp.learning_rate,
        "n_steps": config.buffer_size,
        "batch_size": config.batch_size,
        "n_epochs": hp.n_epochs,
        "gamma": hp.gamma,
        "gae_lambda": hp.gae_lambda,
        "clip_range": hp.clip_range,
        "ent_coef": hp.ent_coef,
        "vf_coef": hp.vf_coef,
        "max_grad_norm": hp.max_grad_norm,
        "seed": config.seed,
    })
}

impl<B, O> PolicyTrainer for PpoTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ActorCriticPolicy<B>, B>,
{
    fn policy_kind(&self) -> PolicyKind {
        self.config.policy
    }

    fn set_logger(&mut self, logger: MetricsLogger) {
        PpoTrainer::set_logger(self, logger);
    }

    fn freeze_features_extractor(&mut self) {
        PpoTrainer::freeze_features_extractor(self);
    }

    fn features_extractor_requires_grad(&self) -> Vec<bool> {
        self.policy().features_extractor.requires_grad()
    }

    fn describe(&self) -> String {
        let policy = self.policy();
        let kind = self.config.encoder.kind;
        let features_dim = policy.features_extractor.features_dim();
        let [height, width, channels] = self.observation_shape;

        let mut lines = vec![format!(
            "{} ({})",
            self.config.policy.algorithm_name(),
            self.config.policy.head_name()
        )];
        lines.push(format!(
            "features_extractor: {} input {}x{}x{} features_dim {}",
            kind.class_name(),
            height,
            width,
            channels,
            features_dim
        ));
        for (i, spec) in kind.layers().iter().enumerate() {
            lines.push(format!(
                "  conv{}: {} channels, kernel {}, stride {}, padding {}",
                i, spec.out_channels, spec.kernel, spec.stride, spec.padding
            ));
        }
        lines.push(format!("  linear: -> {}", features_dim));
        let latent = match policy.lstm_hidden_size() {
            Some(hidden) => {
                lines.push(format!("lstm: {} -> {}", features_dim, hidden));
                hidden
            }
            None => features_dim,
        };
        lines.push(format!("action_net: {} -> {}", latent, self.layout.logits_dim()));
        lines.push(format!("value_net: {} -> 1", latent));
        if self.layout.is_continuous() {
            lines.push(format!("log_std: {}", self.layout.action_dim()));
        }
        lines.push(format!("parameters: {}", self.num_params()));
        lines.join("\n")
    }

    fn num_params(&self) -> usize {
        self.policy().num_params()
    }

    fn hyperparameters(&self) -> serde_json::Value {
        self.hparams.clone()
    }

    fn learn(
        &mut self,
        env: &mut dyn VecEnvironment,
        total_timesteps: u64,
        callbacks: &mut CallbackList,
    ) -> Result<(), TrainError> {
        PpoTrainer::learn(self, env, total_timesteps, callbacks)
    }

    fn save(&self, path: &Path) -> Result<(), TrainError> {
        self.policy()
            .clone()
            .save_file(path.to_path_buf(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .map_err(TrainError::record)?;
        info!("Model saved to {}.mpk", path.display());
        Ok(())
    }

    fn save_encoder_policy_network(&self, dir: &Path) -> Result<(), TrainError> {
        fs::create_dir_all(dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let policy = self.policy();
        policy
            .features_extractor
            .clone()
            .save_file(dir.join(FEATURE_EXTRACTOR_FILE), &recorder)
            .map_err(TrainError::record)?;
        policy
            .head
            .clone()
            .save_file(dir.join(POLICY_NET_FILE), &recorder)
            .map_err(TrainError::record)?;
        Ok(())
    }
}
