// Imprinting chamber - the concrete environment the agent trains in.

use std::path::Path;

use crate::env::launch::LaunchOptions;
use crate::env::session::SimulationSession;
use crate::env::spaces::{Action, ActionSpace, Observation, ObservationSpace, ResetOptions, StepResult};
use crate::env::unity_env::UnityEnvironment;
use crate::env::wrapper::{ChamberEnvWrapper, SessionOptions};
use crate::env::Environment;
use crate::error::EnvError;

/// Episode length the chamber build uses when `episode_steps` is not given.
pub const DEFAULT_EPISODE_STEPS: u64 = 1000;

/// The imprinting chamber.
///
/// Each training episode shows one stimulus, so an episode count covers
/// `episodes * episode_steps * num_stimuli` environment steps.
pub struct ChamberEnv<S: SimulationSession = UnityEnvironment> {
    inner: ChamberEnvWrapper<S>,
    episode_steps: u64,
    num_stimuli: u64,
}

impl ChamberEnv<UnityEnvironment> {
    pub fn launch(
        run_id: &str,
        env_path: Option<&Path>,
        base_port: u16,
        options: &LaunchOptions,
        log_dir: &Path,
        session: SessionOptions,
        num_stimuli: u64,
    ) -> Result<Self, EnvError> {
        let inner = ChamberEnvWrapper::launch(run_id, env_path, base_port, options, log_dir, session)?;
        Ok(Self::new(
            inner,
            options.episode_steps.unwrap_or(DEFAULT_EPISODE_STEPS),
            num_stimuli,
        ))
    }
}

impl<S: SimulationSession> ChamberEnv<S> {
    pub fn new(inner: ChamberEnvWrapper<S>, episode_steps: u64, num_stimuli: u64) -> Self {
        Self {
            inner,
            episode_steps,
            num_stimuli: num_stimuli.max(1),
        }
    }

    pub fn wrapper(&self) -> &ChamberEnvWrapper<S> {
        &self.inner
    }

    pub fn wrapper_mut(&mut self) -> &mut ChamberEnvWrapper<S> {
        &mut self.inner
    }

    pub fn episode_steps(&self) -> u64 {
        self.episode_steps
    }

    pub fn num_stimuli(&self) -> u64 {
        self.num_stimuli
    }

    pub fn log(&self, msg: &str) -> Result<(), EnvError> {
        self.inner.log(msg)
    }
}

impl<S: SimulationSession> Environment for ChamberEnv<S> {
    // A closed chamber has no session to ask; callers get Closed from step/reset instead
    fn observation_space(&self) -> &ObservationSpace {
        match self.inner.observation_space() {
            Ok(space) => space,
            Err(_) => &CLOSED_OBSERVATION_SPACE,
        }
    }

    fn action_space(&self) -> &ActionSpace {
        match self.inner.action_space() {
            Ok(space) => space,
            Err(_) => &CLOSED_ACTION_SPACE,
        }
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<Observation, EnvError> {
        self.inner.reset(options)
    }

    fn step(&mut self, action: &Action) -> Result<StepResult, EnvError> {
        self.inner.step(action)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.inner.close()
    }

    fn steps_from_episodes(&self, episodes: u64) -> Result<u64, EnvError> {
        episodes
            .checked_mul(self.episode_steps)
            .and_then(|steps| steps.checked_mul(self.num_stimuli))
            .ok_or(EnvError::StepBudgetOverflow { episodes })
    }
}

static CLOSED_OBSERVATION_SPACE: ObservationSpace = ObservationSpace { shape: Vec::new() };
static CLOSED_ACTION_SPACE: ActionSpace = ActionSpace::Discrete(Vec::new());
