// Run settings - the YAML configuration of a training run.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentOptions;
use crate::env::launch::LaunchOptions;
use crate::env::wrapper::SessionOptions;
use crate::error::ConfigError;
use crate::side_channel::EngineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub run_id: String,
    /// Agents write under `<log_path>/<run_id>/`.
    pub log_path: PathBuf,
    pub episodes: u64,
    /// Reuse an existing run directory.
    pub force: bool,
    pub debug: bool,
    pub env_settings: EnvironmentSettings,
    pub agent: AgentOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Chamber build; `None` connects to a running editor.
    pub env_path: Option<PathBuf>,
    pub base_port: u16,
    /// Simulator seed; -1 draws one at random.
    pub seed: i32,
    /// Seconds to wait for the simulator to connect.
    pub timeout_wait: u64,
    pub no_graphics: bool,
    /// Stimuli shown per training episode.
    pub num_stimuli: u64,
    pub launch: LaunchOptions,
    pub engine: Option<EngineConfig>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: "chamber_run".to_string(),
            log_path: PathBuf::from("Brains"),
            episodes: 1000,
            force: false,
            debug: false,
            env_settings: EnvironmentSettings::default(),
            agent: AgentOptions::default(),
        }
    }
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            env_path: None,
            base_port: 5004,
            seed: -1,
            timeout_wait: 60,
            no_graphics: false,
            num_stimuli: 1,
            launch: LaunchOptions::default(),
            engine: None,
        }
    }
}

impl EnvironmentSettings {
    pub fn session_options(&self, seed: i32) -> SessionOptions {
        SessionOptions {
            seed,
            timeout_wait: Duration::from_secs(self.timeout_wait),
            no_graphics: self.no_graphics,
            engine_config: self.engine.clone(),
        }
    }
}

impl RunOptions {
    pub fn from_yaml(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let options: RunOptions = serde_yaml::from_str(content)?;
        Ok(options)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn as_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Directory of this run: `<log_path>/<run_id>`.
    pub fn run_dir(&self) -> PathBuf {
        self.log_path.join(&self.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let options = RunOptions::from_yaml_str("run_id: chick_1\nepisodes: 10\n").unwrap();
        assert_eq!(options.run_id, "chick_1");
        assert_eq!(options.episodes, 10);
        assert_eq!(options.env_settings.base_port, 5004);
        assert_eq!(options.agent.policy, "ppo");
    }

    #[test]
    fn test_nested_sections() {
        let yaml = r#"
env_settings:
  env_path: builds/chamber.x86_64
  seed: 3
  launch:
    record_chamber: true
    episode_steps: 200
  engine:
    width: 64
    height: 64
agent:
  policy: rppo
  encoder_type: medium
  encoder_dim: 256
  hyperparameters:
    n_epochs: 4
"#;
        let options = RunOptions::from_yaml_str(yaml).unwrap();
        assert_eq!(options.env_settings.launch.episode_steps, Some(200));
        assert!(options.env_settings.launch.record_chamber);
        let engine = options.env_settings.engine.clone().unwrap();
        assert_eq!(engine.width, 64);
        assert_eq!(engine.time_scale, 20.0);
        assert_eq!(options.agent.hyperparameters.n_epochs, 4);
        assert_eq!(options.agent.hyperparameters.gamma, 0.99);

        let round_trip = RunOptions::from_yaml_str(&options.to_yaml().unwrap()).unwrap();
        assert_eq!(round_trip, options);
    }

    #[test]
    fn test_invalid_field_type_is_an_error() {
        assert!(RunOptions::from_yaml_str("episodes: many").is_err());
    }
}
