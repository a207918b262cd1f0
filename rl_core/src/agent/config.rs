// Agent configuration - the user-facing options and the directory layout under the log path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::trainers::config::{EncoderSelection, ModelConfig, PolicyKind, PpoHyperparameters};
use crate::trainers::encoders::EncoderKind;

/// Compute device. Only the CPU backend is built; `auto` resolves to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Auto,
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "auto" => Ok(Device::Auto),
            _ => Err(ConfigError::UnsupportedDevice(value.to_string())),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOptions {
    /// `ppo` or one of the recurrent aliases.
    pub policy: String,
    pub encoder_type: String,
    pub encoder_dim: usize,
    pub object_background: Option<String>,
    pub batch_size: usize,
    /// Rollout length per env.
    pub buffer_size: usize,
    pub device: String,
    pub train_encoder: bool,
    /// Interval, in env steps, of best-model checks and checkpoints.
    pub summary_freq: u64,
    pub seed: u64,
    /// Checkpoints to keep; all of them when unset.
    pub keep_checkpoints: Option<usize>,
    pub hyperparameters: PpoHyperparameters,
    pub pretrained_encoder_dir: Option<PathBuf>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            policy: "ppo".to_string(),
            encoder_type: EncoderKind::Small.name().to_string(),
            encoder_dim: EncoderKind::DEFAULT_FEATURES_DIM,
            object_background: None,
            batch_size: 64,
            buffer_size: 2048,
            device: Device::Cpu.to_string(),
            train_encoder: true,
            summary_freq: 30_000,
            seed: 0,
            keep_checkpoints: None,
            hyperparameters: PpoHyperparameters::default(),
            pretrained_encoder_dir: None,
        }
    }
}

impl AgentOptions {
    /// Parses the policy, encoder and device, rejecting unknown values.
    pub fn resolve(&self) -> Result<(ModelConfig, Device), ConfigError> {
        let policy: PolicyKind = self.policy.parse()?;
        let encoder = EncoderSelection::resolve(
            &self.encoder_type,
            self.encoder_dim,
            self.object_background.as_deref(),
        )?;
        let device: Device = self.device.parse()?;
        if self.summary_freq == 0 {
            return Err(ConfigError::Invalid("summary_freq must be positive".into()));
        }

        let config = ModelConfig {
            policy,
            encoder,
            batch_size: self.batch_size,
            buffer_size: self.buffer_size,
            seed: self.seed,
            hyperparameters: self.hyperparameters.clone(),
            pretrained_encoder_dir: self.pretrained_encoder_dir.clone(),
        };
        config.validate()?;
        Ok((config, device))
    }
}

/// Where an agent writes its artifacts: `<log_path>/<agent_id>/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub root: PathBuf,
}

impl AgentPaths {
    pub fn new(log_path: &Path, agent_id: &str) -> Self {
        Self {
            root: log_path.join(agent_id),
        }
    }

    pub fn checkpoints(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn plots(&self) -> PathBuf {
        self.root.join("plots")
    }

    pub fn model_snapshots(&self) -> PathBuf {
        self.root.join("model_snapshots")
    }

    pub fn env_logs(&self) -> PathBuf {
        self.root.join("Env_Logs")
    }

    /// Final model, without extension.
    pub fn model(&self) -> PathBuf {
        self.root.join("model")
    }

    pub fn model_properties(&self) -> PathBuf {
        self.root.join("model_properties.txt")
    }

    pub fn reward_plot(&self, agent_id: &str) -> PathBuf {
        self.plots().join(format!("reward_graph_{}.png", agent_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parsing() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("auto".parse::<Device>().unwrap(), Device::Auto);
        assert!(matches!("cuda:0".parse::<Device>(), Err(ConfigError::UnsupportedDevice(_))));
    }

    #[test]
    fn test_resolve_defaults() {
        let (config, device) = AgentOptions::default().resolve().unwrap();
        assert_eq!(config.policy, PolicyKind::Ppo);
        assert_eq!(config.encoder.kind, EncoderKind::Small);
        assert!(config.encoder.args.is_none());
        assert_eq!(device, Device::Cpu);
    }

    #[test]
    fn test_resolve_rejects_unknown_encoder() {
        let options = AgentOptions {
            encoder_type: "resnet".into(),
            ..Default::default()
        };
        assert!(matches!(options.resolve(), Err(ConfigError::UnknownEncoder(_))));
    }

    #[test]
    fn test_options_from_yaml() {
        let options: AgentOptions = serde_yaml::from_str(
            "policy: lstm\nencoder_type: simclr\nencoder_dim: 128\nobject_background: ship_A\ntrain_encoder: false\n",
        )
        .unwrap();
        let (config, _) = options.resolve().unwrap();
        assert!(config.policy.is_recurrent());
        let args = config.encoder.args.unwrap();
        assert_eq!(args.features_dim, 128);
        assert_eq!(args.object_background.as_deref(), Some("ship_A"));
        assert!(!options.train_encoder);
    }
}
