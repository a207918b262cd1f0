// Chamber RL - Unity imprinting-chamber environment adapter and the PPO
// training agent that learns in it.

pub mod agent;
pub mod cli;
pub mod communicator_objects;
pub mod env;
pub mod error;
pub mod grpc_server;
pub mod learn;
pub mod settings;
pub mod side_channel;
pub mod trainers;
pub mod utils;

// Re-export main types
pub use agent::{AgentOptions, TrainOutcome, TrainingAgent};
pub use env::{ChamberEnv, ChamberEnvWrapper, Environment, UnityEnvironment};
pub use error::{CheckError, ConfigError, EnvError, TrainError};
pub use learn::{get_version_string, run_training};
pub use settings::{EnvironmentSettings, RunOptions};
