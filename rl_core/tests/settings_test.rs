use std::fs;
use std::path::PathBuf;

use chamber_rl::cli::Cli;
use chamber_rl::RunOptions;
use clap::Parser;

const RUN_YAML: &str = r#"
run_id: imprint_ship
log_path: Brains/ship
episodes: 50
env_settings:
  env_path: builds/chamber.x86_64
  base_port: 5010
  num_stimuli: 2
  launch:
    rewarded: true
    episode_steps: 1000
agent:
  policy: ppo
  encoder_type: medium
  encoder_dim: 128
  train_encoder: false
"#;

#[test]
fn test_yaml_file_with_cli_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    fs::write(&path, RUN_YAML).unwrap();

    let cli = Cli::parse_from([
        "chamber-learn",
        path.to_str().unwrap(),
        "--base-port",
        "6000",
        "--log-path",
        "/tmp/brains",
    ]);
    cli.validate().unwrap();
    let options = cli.load_run_options().unwrap();

    assert_eq!(options.run_id, "imprint_ship");
    assert_eq!(options.episodes, 50);
    assert_eq!(options.env_settings.base_port, 6000);
    assert_eq!(options.env_settings.num_stimuli, 2);
    assert_eq!(options.log_path, PathBuf::from("/tmp/brains"));
    assert_eq!(options.run_dir(), PathBuf::from("/tmp/brains/imprint_ship"));
    assert!(options.env_settings.launch.rewarded);
    assert!(!options.agent.train_encoder);

    let (config, _) = options.agent.resolve().unwrap();
    assert_eq!(config.encoder.features_dim(), 128);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let cli = Cli::parse_from(["chamber-learn", "/nonexistent/run.yaml"]);
    assert!(cli.load_run_options().is_err());
}

#[test]
fn test_no_config_uses_defaults() {
    let cli = Cli::parse_from(["chamber-learn", "--run-id", "chick_9"]);
    let options = cli.load_run_options().unwrap();
    assert_eq!(options.run_id, "chick_9");
    assert_eq!(options.env_settings, RunOptions::default().env_settings);
}
