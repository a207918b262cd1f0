// Command-line interface for chamber-learn
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use crate::error::ConfigError;
use crate::settings::RunOptions;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "chamber-learn")]
#[command(version)]
#[command(about = "Train an imprinting agent in the Unity chamber", long_about = None)]
pub struct Cli {
    /// Path to the run configuration YAML file
    #[arg(value_name = "CONFIG")]
    pub config_path: Option<PathBuf>,

    /// The identifier for the training run
    #[arg(long = "run-id")]
    pub run_id: Option<String>,

    /// Path to the chamber executable; omit to connect to the editor
    #[arg(long = "env", value_name = "PATH")]
    pub env_path: Option<PathBuf>,

    /// Starting port for simulator communication
    #[arg(long = "base-port")]
    pub base_port: Option<u16>,

    /// Number of training episodes
    #[arg(long)]
    pub episodes: Option<u64>,

    /// Simulator seed (-1 for random)
    #[arg(long, allow_hyphen_values = true)]
    pub seed: Option<i32>,

    /// Directory agents write their logs and models to
    #[arg(long = "log-path")]
    pub log_path: Option<PathBuf>,

    /// Training device (cpu or auto)
    #[arg(long)]
    pub device: Option<String>,

    /// Overwrite an existing run directory
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Enable debug-level logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Cli {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(run_id) = &self.run_id {
            if run_id.trim().is_empty() {
                return Err(ConfigError::Invalid("--run-id must not be empty".into()));
            }
        }
        if self.episodes == Some(0) {
            return Err(ConfigError::Invalid("--episodes must be at least 1".into()));
        }
        if self.base_port == Some(0) {
            return Err(ConfigError::Invalid("--base-port must be non-zero".into()));
        }
        if let Some(seed) = self.seed {
            if seed < -1 {
                return Err(ConfigError::Invalid("--seed must be -1 or non-negative".into()));
            }
        }
        Ok(())
    }

    /// Loads the YAML configuration, if any, and applies the command-line overrides.
    pub fn load_run_options(&self) -> Result<RunOptions, ConfigError> {
        let mut options = match &self.config_path {
            Some(path) => RunOptions::from_yaml(path)?,
            None => RunOptions::default(),
        };
        self.apply_overrides(&mut options);
        Ok(options)
    }

    pub fn apply_overrides(&self, options: &mut RunOptions) {
        if let Some(run_id) = &self.run_id {
            options.run_id = run_id.clone();
        }
        if let Some(env_path) = &self.env_path {
            options.env_settings.env_path = Some(env_path.clone());
        }
        if let Some(port) = self.base_port {
            options.env_settings.base_port = port;
        }
        if let Some(episodes) = self.episodes {
            options.episodes = episodes;
        }
        if let Some(seed) = self.seed {
            options.env_settings.seed = seed;
        }
        if let Some(log_path) = &self.log_path {
            options.log_path = log_path.clone();
        }
        if let Some(device) = &self.device {
            options.agent.device = device.clone();
        }
        options.force |= self.force;
        options.debug |= self.debug;
    }
}

pub fn print_configuration(options: &RunOptions) {
    info!("Run ID:      {}", options.run_id);
    info!("Log path:    {}", options.log_path.display());
    match &options.env_settings.env_path {
        Some(env) => info!("Environment: {}", env.display()),
        None => info!("Environment: <Unity Editor>"),
    }
    info!("Base port:   {}", options.env_settings.base_port);
    info!("Episodes:    {}", options.episodes);
    info!("Policy:      {} / {} encoder", options.agent.policy, options.agent.encoder_type);
    info!("Device:      {}", options.agent.device);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_basic() {
        let cli = Cli::parse_from(["chamber-learn", "config.yaml"]);
        assert_eq!(cli.config_path, Some(PathBuf::from("config.yaml")));
        assert!(cli.run_id.is_none());
    }

    #[test]
    fn test_overrides_win_over_yaml() {
        let cli = Cli::parse_from([
            "chamber-learn",
            "--run-id",
            "chick_7",
            "--episodes",
            "5",
            "--seed",
            "-1",
            "--device",
            "auto",
        ]);
        cli.validate().unwrap();
        let mut options = RunOptions::from_yaml_str("run_id: other\nepisodes: 100\n").unwrap();
        cli.apply_overrides(&mut options);
        assert_eq!(options.run_id, "chick_7");
        assert_eq!(options.episodes, 5);
        assert_eq!(options.env_settings.seed, -1);
        assert_eq!(options.agent.device, "auto");
    }

    #[test]
    fn test_validate_rejects_zero_episodes() {
        let cli = Cli::parse_from(["chamber-learn", "--episodes", "0"]);
        assert!(cli.validate().is_err());
    }
}
