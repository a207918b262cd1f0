//! Error types for the chamber environment and the training agent.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the simulator connection and the environment adapter.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("simulator executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("failed to launch simulator {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("port check failed on {port}: {source}")]
    PortCheck {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("no free port at or above {0}")]
    PortsExhausted(u16),

    #[error("communicator error: {0}")]
    Communicator(String),

    #[error("timed out after {0:?} waiting for the simulator")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("side channel error: {0}")]
    SideChannel(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("environment is closed")]
    Closed,

    #[error("step budget for {episodes} episodes does not fit in u64")]
    StepBudgetOverflow { episodes: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Violations found by the environment checker.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("observation space must be a non-empty HWC image, got shape {0:?}")]
    ObservationSpace(Vec<usize>),

    #[error("invalid action space: {0}")]
    ActionSpace(String),

    #[error("{context} returned an observation of shape {actual:?}, expected {expected:?}")]
    ObservationShape {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("observation data has {actual} bytes, shape {shape:?} needs {expected}")]
    ObservationSize {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("step returned a non-finite reward: {0}")]
    NonFiniteReward(f32),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Configuration errors, raised while the agent or the run is being set up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown policy '{0}' (expected 'ppo' or a recurrent alias such as 'recurrent_ppo')")]
    UnknownPolicy(String),

    #[error("unknown encoder type '{0}' (expected one of: small, medium, large, simclr)")]
    UnknownEncoder(String),

    #[error("unsupported device '{0}' (this build trains on 'cpu' or 'auto')")]
    UnsupportedDevice(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors raised while training or persisting training artifacts.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("record error: {0}")]
    Record(String),

    #[error("tensor error: {0}")]
    Tensor(String),

    #[error("plot error: {0}")]
    Plot(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TrainError {
    pub(crate) fn record(err: impl std::fmt::Debug) -> Self {
        TrainError::Record(format!("{err:?}"))
    }

    pub(crate) fn tensor(err: impl std::fmt::Debug) -> Self {
        TrainError::Tensor(format!("{err:?}"))
    }
}
