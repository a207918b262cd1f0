// Shared fakes for the integration tests.
#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use chamber_rl::env::{
    Action, ActionSpace, Environment, Observation, ObservationSpace, RawReward, ResetOptions, SessionStep,
    SimulationSession, StepInfo, StepResult,
};
use chamber_rl::EnvError;

pub const OBS_SHAPE: [usize; 3] = [36, 36, 3];

/// A session that replays a fixed list of rewards.
pub struct StubSession {
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    rewards: Vec<RawReward>,
    step: usize,
    pub closes: Rc<Cell<usize>>,
}

impl StubSession {
    pub fn new(rewards: Vec<RawReward>) -> Self {
        Self {
            observation_space: ObservationSpace::image(OBS_SHAPE[0], OBS_SHAPE[1], OBS_SHAPE[2]),
            action_space: ActionSpace::Discrete(vec![3]),
            rewards,
            step: 0,
            closes: Rc::new(Cell::new(0)),
        }
    }
}

impl SimulationSession for StubSession {
    fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn reset(&mut self, _options: &ResetOptions) -> Result<Observation, EnvError> {
        Ok(Observation::zeros(OBS_SHAPE))
    }

    fn step(&mut self, _action: &Action) -> Result<SessionStep, EnvError> {
        let reward = self.rewards.get(self.step).copied().unwrap_or(RawReward::Float(0.0));
        self.step += 1;
        Ok(SessionStep {
            observation: Observation::zeros(OBS_SHAPE),
            reward,
            done: self.step >= self.rewards.len(),
            info: StepInfo::default(),
        })
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

/// An image environment with fixed-length episodes that rewards action 1.
pub struct StubEnv {
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    episode_length: u64,
    steps_per_episode_budget: u64,
    t: u64,
    pub closed: bool,
}

impl StubEnv {
    pub fn new(episode_length: u64, steps_per_episode_budget: u64) -> Self {
        Self {
            observation_space: ObservationSpace::image(OBS_SHAPE[0], OBS_SHAPE[1], OBS_SHAPE[2]),
            action_space: ActionSpace::Discrete(vec![3]),
            episode_length,
            steps_per_episode_budget,
            t: 0,
            closed: false,
        }
    }

    /// An environment whose observation space is not an image.
    pub fn flat() -> Self {
        Self {
            observation_space: ObservationSpace { shape: vec![8] },
            ..Self::new(10, 100)
        }
    }

    fn observation(&self) -> Observation {
        let shade = ((self.t * 25) % 256) as u8;
        Observation::new(OBS_SHAPE, vec![shade; OBS_SHAPE.iter().product()])
    }
}

impl Environment for StubEnv {
    fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn reset(&mut self, _options: &ResetOptions) -> Result<Observation, EnvError> {
        self.t = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: &Action) -> Result<StepResult, EnvError> {
        self.t += 1;
        let reward = match action {
            Action::Discrete(values) if values.first() == Some(&1) => 1.0,
            _ => 0.0,
        };
        let done = self.t >= self.episode_length;
        Ok(StepResult {
            observation: self.observation(),
            reward,
            done,
            info: StepInfo {
                interrupted: done,
                ..Default::default()
            },
        })
    }

    fn close(&mut self) -> Result<(), EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        self.closed = true;
        Ok(())
    }

    fn steps_from_episodes(&self, episodes: u64) -> Result<u64, EnvError> {
        episodes
            .checked_mul(self.steps_per_episode_budget)
            .ok_or(EnvError::StepBudgetOverflow { episodes })
    }
}
