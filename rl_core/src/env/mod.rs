// Environment layer - the Unity session, the chamber adapter and the decorators
// the training agent stacks on top of it.

pub mod chamber;
pub mod checker;
pub mod launch;
pub mod monitor;
pub mod port;
pub mod session;
pub mod spaces;
pub mod unity_env;
pub mod vec_env;
pub mod wrapper;

pub use chamber::{ChamberEnv, DEFAULT_EPISODE_STEPS};
pub use checker::check_env;
pub use launch::LaunchOptions;
pub use monitor::{load_results, Monitor, MonitorResults, MONITOR_FILE};
pub use port::{find_free_port, port_in_use};
pub use session::SimulationSession;
pub use spaces::{
    Action, ActionSpace, EpisodeStats, Observation, ObservationSpace, RawReward, ResetOptions,
    SessionStep, StepInfo, StepResult,
};
pub use unity_env::{UnityEnvironment, UnityLaunch};
pub use vec_env::{DummyVecEnv, VecEnvironment, VecStep};
pub use wrapper::ChamberEnvWrapper;

use crate::error::EnvError;

/// A single-agent environment the training agent can drive.
pub trait Environment {
    fn observation_space(&self) -> &ObservationSpace;

    fn action_space(&self) -> &ActionSpace;

    fn reset(&mut self, options: &ResetOptions) -> Result<Observation, EnvError>;

    fn step(&mut self, action: &Action) -> Result<StepResult, EnvError>;

    fn close(&mut self) -> Result<(), EnvError>;

    /// Step budget for `episodes` episodes.
    ///
    /// Episode length and stimulus count live in the simulator build, so every
    /// concrete environment has to say how they combine. A budget that does not
    /// fit in `u64` is `EnvError::StepBudgetOverflow`.
    fn steps_from_episodes(&self, episodes: u64) -> Result<u64, EnvError>;
}

impl<E: Environment + ?Sized> Environment for &mut E {
    fn observation_space(&self) -> &ObservationSpace {
        (**self).observation_space()
    }

    fn action_space(&self) -> &ActionSpace {
        (**self).action_space()
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<Observation, EnvError> {
        (**self).reset(options)
    }

    fn step(&mut self, action: &Action) -> Result<StepResult, EnvError> {
        (**self).step(action)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        (**self).close()
    }

    fn steps_from_episodes(&self, episodes: u64) -> Result<u64, EnvError> {
        (**self).steps_from_episodes(episodes)
    }
}
