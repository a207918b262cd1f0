// Learn - entry point for a training run: launches the chamber, trains one
// agent in it and records what the run did.

use std::fs;
use std::path::Path;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{TrainOutcome, TrainingAgent};
use crate::env::{ChamberEnv, Environment};
use crate::error::{ConfigError, TrainError};
use crate::settings::RunOptions;

pub const CONFIGURATION_FILE_NAME: &str = "configuration.yaml";
pub const TRAINING_STATUS_FILE_NAME: &str = "training_status.json";
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn get_version_string() -> String {
    format!(
        "Version information:\n  chamber-rl: {},\n  communication protocol: {}",
        VERSION,
        crate::grpc_server::COMMUNICATION_VERSION
    )
}

/// The configured seed, or a random one when it is -1.
pub fn resolve_run_seed(seed: i32) -> i32 {
    if seed == -1 {
        rand::thread_rng().gen_range(0..10000)
    } else {
        seed
    }
}

#[derive(Debug, Serialize)]
struct TrainingStatus<'a> {
    run_id: &'a str,
    version: &'a str,
    run_seed: i32,
    completed: bool,
    timesteps: Option<u64>,
    env_check_failure: Option<&'a str>,
    timestamp: String,
}

pub fn run_training(options: &RunOptions) -> Result<TrainOutcome, TrainError> {
    let run_dir = options.run_dir();
    validate_existing_directories(&run_dir, options.force)?;
    fs::create_dir_all(&run_dir)?;
    write_run_options(&run_dir, options)?;

    let run_seed = resolve_run_seed(options.env_settings.seed);
    info!("Run seed: {}", run_seed);

    let env_settings = &options.env_settings;
    let mut env = ChamberEnv::launch(
        &options.run_id,
        env_settings.env_path.as_deref(),
        env_settings.base_port,
        &env_settings.launch,
        &run_dir.join("Env_Logs"),
        env_settings.session_options(run_seed),
        env_settings.num_stimuli,
    )?;

    let trained = TrainingAgent::new(&options.run_id, &options.log_path, options.agent.clone())
        .and_then(|mut agent| agent.train(&mut env, options.episodes));

    // The simulator process is shut down whether or not training succeeded
    if let Err(err) = env.close() {
        warn!("Failed to close the chamber cleanly: {}", err);
    }
    let outcome = trained?;

    write_training_status(&run_dir, &options.run_id, run_seed, &outcome)?;
    match &outcome {
        TrainOutcome::Completed { timesteps } => {
            info!("Training completed after {} steps", timesteps)
        }
        TrainOutcome::EnvCheckFailed { reason } => {
            warn!("Training skipped, the environment failed its check: {}", reason)
        }
    }
    Ok(outcome)
}

pub fn validate_existing_directories(run_dir: &Path, force: bool) -> Result<(), ConfigError> {
    if run_dir.exists() && !force {
        return Err(ConfigError::Invalid(format!(
            "Directory {:?} already exists. Use --force to overwrite.",
            run_dir
        )));
    }
    Ok(())
}

fn write_run_options(output_dir: &Path, options: &RunOptions) -> Result<(), TrainError> {
    fs::write(output_dir.join(CONFIGURATION_FILE_NAME), options.to_yaml()?)?;
    Ok(())
}

fn write_training_status(
    output_dir: &Path,
    run_id: &str,
    run_seed: i32,
    outcome: &TrainOutcome,
) -> Result<(), TrainError> {
    let (completed, timesteps, env_check_failure) = match outcome {
        TrainOutcome::Completed { timesteps } => (true, Some(*timesteps), None),
        TrainOutcome::EnvCheckFailed { reason } => (false, None, Some(reason.as_str())),
    };
    let status = TrainingStatus {
        run_id,
        version: VERSION,
        run_seed,
        completed,
        timesteps,
        env_check_failure,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    fs::write(
        output_dir.join(TRAINING_STATUS_FILE_NAME),
        serde_json::to_string_pretty(&status)?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        assert!(get_version_string().contains("chamber-rl"));
    }

    #[test]
    fn test_run_seed() {
        assert_eq!(resolve_run_seed(42), 42);
        let drawn = resolve_run_seed(-1);
        assert!((0..10000).contains(&drawn));
    }

    #[test]
    fn test_existing_run_dir_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_existing_directories(dir.path(), false).is_err());
        assert!(validate_existing_directories(dir.path(), true).is_ok());
        assert!(validate_existing_directories(&dir.path().join("new_run"), false).is_ok());
    }

    #[test]
    fn test_training_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = TrainOutcome::Completed { timesteps: 1000 };
        write_training_status(dir.path(), "chick_1", 7, &outcome).unwrap();
        let contents = fs::read_to_string(dir.path().join(TRAINING_STATUS_FILE_NAME)).unwrap();
        let status: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(status["completed"], true);
        assert_eq!(status["timesteps"], 1000);
        assert_eq!(status["run_seed"], 7);
    }
}
