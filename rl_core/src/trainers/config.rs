// Trainer configuration - policy kind, encoder selection and PPO hyper-parameters.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::trainers::encoders::EncoderKind;

/// Which trainer and policy head to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Standard PPO with a convolutional policy.
    Ppo,
    /// Recurrent PPO with a convolutional encoder followed by an LSTM.
    RecurrentPpo,
}

const RECURRENT_ALIASES: [&str; 5] = ["recurrentppo", "recurrent_ppo", "rppo", "lstm", "ppo_lstm"];

impl PolicyKind {
    pub fn is_recurrent(self) -> bool {
        matches!(self, PolicyKind::RecurrentPpo)
    }

    /// Name of the policy head.
    pub fn head_name(self) -> &'static str {
        match self {
            PolicyKind::Ppo => "CnnPolicy",
            PolicyKind::RecurrentPpo => "CnnLstmPolicy",
        }
    }

    pub fn algorithm_name(self) -> &'static str {
        match self {
            PolicyKind::Ppo => "PPO",
            PolicyKind::RecurrentPpo => "RecurrentPPO",
        }
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_ascii_lowercase();
        if lower == "ppo" {
            Ok(PolicyKind::Ppo)
        } else if RECURRENT_ALIASES.contains(&lower.as_str()) {
            Ok(PolicyKind::RecurrentPpo)
        } else {
            Err(ConfigError::UnknownPolicy(value.to_string()))
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.algorithm_name())
    }
}

/// Custom feature-extractor arguments handed to the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorArgs {
    pub class: EncoderKind,
    pub features_dim: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_background: Option<String>,
}

/// The resolved encoder choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSelection {
    pub kind: EncoderKind,
    /// `None` for the built-in extractor.
    pub args: Option<ExtractorArgs>,
}

impl EncoderSelection {
    pub fn resolve(
        encoder_type: &str,
        encoder_dim: usize,
        object_background: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let kind: EncoderKind = encoder_type.parse()?;
        if kind == EncoderKind::Small {
            return Ok(Self { kind, args: None });
        }
        if encoder_dim == 0 {
            return Err(ConfigError::Invalid("encoder_dim must be positive".into()));
        }
        let object_background = match kind {
            EncoderKind::SimClr => object_background.map(str::to_string),
            _ => None,
        };
        Ok(Self {
            kind,
            args: Some(ExtractorArgs {
                class: kind,
                features_dim: encoder_dim,
                object_background,
            }),
        })
    }

    pub fn features_dim(&self) -> usize {
        self.args
            .as_ref()
            .map(|args| args.features_dim)
            .unwrap_or(EncoderKind::DEFAULT_FEATURES_DIM)
    }
}

fn default_learning_rate() -> f64 {
    3e-4
}

/// PPO hyper-parameters. Defaults follow the usual PPO settings for image inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoHyperparameters {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    pub n_epochs: usize,
    pub gamma: f32,
    pub gae_lambda: f32,
    pub clip_range: f32,
    pub ent_coef: f32,
    pub vf_coef: f32,
    pub max_grad_norm: f32,
    pub normalize_advantage: bool,
    pub lstm_hidden_size: usize,
    pub log_std_init: f32,
}

impl Default for PpoHyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            n_epochs: 10,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_range: 0.2,
            ent_coef: 0.0,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
            normalize_advantage: true,
            lstm_hidden_size: 256,
            log_std_init: 0.0,
        }
    }
}

/// Everything a trainer factory needs to build a model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub policy: PolicyKind,
    pub encoder: EncoderSelection,
    /// Minibatch size.
    pub batch_size: usize,
    /// Rollout length per env (`n_steps`).
    pub buffer_size: usize,
    pub seed: u64,
    pub hyperparameters: PpoHyperparameters,
    /// Directory holding pretrained SimCLR weights, one file per object background.
    pub pretrained_encoder_dir: Option<PathBuf>,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.buffer_size == 0 {
            return Err(ConfigError::Invalid("batch_size and buffer_size must be positive".into()));
        }
        if self.hyperparameters.n_epochs == 0 {
            return Err(ConfigError::Invalid("n_epochs must be positive".into()));
        }
        if self.policy.is_recurrent() && self.hyperparameters.lstm_hidden_size == 0 {
            return Err(ConfigError::Invalid("lstm_hidden_size must be positive".into()));
        }
        Ok(())
    }
}
