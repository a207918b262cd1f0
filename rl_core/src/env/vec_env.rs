// Vectorized environments - a batched step interface over one or more envs.

use crate::env::spaces::{Action, ActionSpace, Observation, ObservationSpace, ResetOptions, StepInfo};
use crate::env::Environment;
use crate::error::EnvError;

/// One batched transition.
#[derive(Debug, Clone)]
pub struct VecStep {
    /// Next observation per env; the first observation of a new episode when done.
    pub observations: Vec<Observation>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub infos: Vec<StepInfo>,
    /// Last observation of the finished episode, for envs that were reset.
    pub terminal_observations: Vec<Option<Observation>>,
}

pub trait VecEnvironment {
    fn num_envs(&self) -> usize;

    fn observation_space(&self) -> &ObservationSpace;

    fn action_space(&self) -> &ActionSpace;

    fn reset(&mut self) -> Result<Vec<Observation>, EnvError>;

    /// Steps every env; envs that finish an episode are reset automatically.
    fn step(&mut self, actions: &[Action]) -> Result<VecStep, EnvError>;

    fn close(&mut self) -> Result<(), EnvError>;
}

/// Steps its environments one after another on the calling thread.
pub struct DummyVecEnv<E: Environment> {
    envs: Vec<E>,
    seed: Option<u64>,
}

impl<E: Environment> DummyVecEnv<E> {
    /// `seed` is passed to the first reset; env `i` gets `seed + i`.
    pub fn new(envs: Vec<E>, seed: Option<u64>) -> Result<Self, EnvError> {
        if envs.is_empty() {
            return Err(EnvError::Protocol("a vectorized env needs at least one env".into()));
        }
        Ok(Self { envs, seed })
    }

    pub fn single(env: E, seed: Option<u64>) -> Self {
        Self {
            envs: vec![env],
            seed,
        }
    }

    pub fn envs(&self) -> &[E] {
        &self.envs
    }

    pub fn into_envs(self) -> Vec<E> {
        self.envs
    }
}

impl<E: Environment> VecEnvironment for DummyVecEnv<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn observation_space(&self) -> &ObservationSpace {
        self.envs[0].observation_space()
    }

    fn action_space(&self) -> &ActionSpace {
        self.envs[0].action_space()
    }

    fn reset(&mut self) -> Result<Vec<Observation>, EnvError> {
        // Seeds are used once; later resets continue the env's own sequence
        let seed = self.seed.take();
        self.envs
            .iter_mut()
            .enumerate()
            .map(|(i, env)| {
                let options = ResetOptions {
                    seed: seed.map(|s| s + i as u64),
                    ..Default::default()
                };
                env.reset(&options)
            })
            .collect()
    }

    fn step(&mut self, actions: &[Action]) -> Result<VecStep, EnvError> {
        if actions.len() != self.envs.len() {
            return Err(EnvError::InvalidAction(format!(
                "{} actions for {} envs",
                actions.len(),
                self.envs.len()
            )));
        }

        let n = self.envs.len();
        let mut batch = VecStep {
            observations: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
            terminal_observations: Vec::with_capacity(n),
        };
        for (env, action) in self.envs.iter_mut().zip(actions) {
            let result = env.step(action)?;
            let (observation, terminal) = if result.done {
                (env.reset(&ResetOptions::default())?, Some(result.observation))
            } else {
                (result.observation, None)
            };
            batch.observations.push(observation);
            batch.rewards.push(result.reward);
            batch.dones.push(result.done);
            batch.infos.push(result.info);
            batch.terminal_observations.push(terminal);
        }
        Ok(batch)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        for env in &mut self.envs {
            env.close()?;
        }
        Ok(())
    }
}
