// Observation, action and transition types shared by sessions, wrappers and trainers.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EnvError;

/// An 8-bit visual observation in HWC layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub shape: [usize; 3],
    pub data: Vec<u8>,
}

impl Observation {
    pub fn new(shape: [usize; 3], data: Vec<u8>) -> Self {
        Self { shape, data }
    }

    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            shape,
            data: vec![0; shape.iter().product()],
        }
    }

    /// Converts unit-range floats (as sent by the simulator) into bytes.
    pub fn from_unit_floats(shape: [usize; 3], values: &[f32]) -> Self {
        let data = values
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        Self { shape, data }
    }

    pub fn height(&self) -> usize {
        self.shape[0]
    }

    pub fn width(&self) -> usize {
        self.shape[1]
    }

    pub fn channels(&self) -> usize {
        self.shape[2]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSpace {
    /// `[height, width, channels]`
    pub shape: Vec<usize>,
}

impl ObservationSpace {
    pub fn image(height: usize, width: usize, channels: usize) -> Self {
        Self {
            shape: vec![height, width, channels],
        }
    }

    /// Shape as an HWC triple, if the space is a 3-d image.
    pub fn hwc(&self) -> Option<[usize; 3]> {
        match self.shape.as_slice() {
            &[h, w, c] => Some([h, w, c]),
            _ => None,
        }
    }

    pub fn contains(&self, obs: &Observation) -> bool {
        self.shape.as_slice() == obs.shape.as_slice()
            && obs.data.len() == obs.shape.iter().product::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSpace {
    /// One categorical branch per entry, each with the given number of choices.
    Discrete(Vec<usize>),
    /// Continuous actions in `[-1, 1]`.
    Continuous(usize),
}

impl ActionSpace {
    pub fn sample(&self, rng: &mut impl Rng) -> Action {
        match self {
            ActionSpace::Discrete(branches) => Action::Discrete(
                branches
                    .iter()
                    .map(|&n| rng.gen_range(0..n.max(1)) as u32)
                    .collect(),
            ),
            ActionSpace::Continuous(dim) => {
                Action::Continuous((0..*dim).map(|_| rng.gen_range(-1.0..=1.0)).collect())
            }
        }
    }

    /// Number of columns an action occupies when stored as floats.
    pub fn action_dim(&self) -> usize {
        match self {
            ActionSpace::Discrete(branches) => branches.len(),
            ActionSpace::Continuous(dim) => *dim,
        }
    }

    pub fn validate(&self, action: &Action) -> Result<(), EnvError> {
        match (self, action) {
            (ActionSpace::Discrete(branches), Action::Discrete(values)) => {
                if branches.len() != values.len() {
                    return Err(EnvError::InvalidAction(format!(
                        "expected {} discrete branches, got {}",
                        branches.len(),
                        values.len()
                    )));
                }
                for (i, (&n, &v)) in branches.iter().zip(values).enumerate() {
                    if v as usize >= n {
                        return Err(EnvError::InvalidAction(format!(
                            "branch {} has {} choices, got {}",
                            i, n, v
                        )));
                    }
                }
                Ok(())
            }
            (ActionSpace::Continuous(dim), Action::Continuous(values)) => {
                if *dim != values.len() {
                    return Err(EnvError::InvalidAction(format!(
                        "expected {} continuous values, got {}",
                        dim,
                        values.len()
                    )));
                }
                Ok(())
            }
            _ => Err(EnvError::InvalidAction(format!(
                "action {:?} does not match space {:?}",
                action, self
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Discrete(Vec<u32>),
    Continuous(Vec<f32>),
}

impl Action {
    /// Flat float encoding, as stored in rollout buffers.
    pub fn to_floats(&self) -> Vec<f32> {
        match self {
            Action::Discrete(values) => values.iter().map(|&v| v as f32).collect(),
            Action::Continuous(values) => values.clone(),
        }
    }

    /// Builds an action of the given space from its float encoding.
    ///
    /// Continuous values are clipped to `[-1, 1]`.
    pub fn from_floats(space: &ActionSpace, values: &[f32]) -> Self {
        match space {
            ActionSpace::Discrete(_) => {
                Action::Discrete(values.iter().map(|v| v.max(0.0).round() as u32).collect())
            }
            ActionSpace::Continuous(_) => {
                Action::Continuous(values.iter().map(|v| v.clamp(-1.0, 1.0)).collect())
            }
        }
    }
}

/// Reward as reported by a session, before coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawReward {
    Float(f32),
    Int(i64),
    Bool(bool),
}

impl RawReward {
    pub fn as_f32(self) -> f32 {
        match self {
            RawReward::Float(v) => v,
            RawReward::Int(v) => v as f32,
            RawReward::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl From<f32> for RawReward {
    fn from(v: f32) -> Self {
        RawReward::Float(v)
    }
}

impl From<i64> for RawReward {
    fn from(v: i64) -> Self {
        RawReward::Int(v)
    }
}

impl From<bool> for RawReward {
    fn from(v: bool) -> Self {
        RawReward::Bool(v)
    }
}

/// Summary of a finished episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeStats {
    pub reward: f32,
    pub length: u64,
    /// Seconds since the monitor started.
    pub elapsed: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    pub agent_id: Option<i32>,
    /// The episode ended because it hit its step limit.
    pub interrupted: bool,
    /// Set on the final step of an episode by the monitor.
    pub episode: Option<EpisodeStats>,
}

/// One transition from a session, reward still in its native type.
#[derive(Debug, Clone)]
pub struct SessionStep {
    pub observation: Observation,
    pub reward: RawReward,
    pub done: bool,
    pub info: StepInfo,
}

/// One transition as seen by agents.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

/// Options forwarded to a session on reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResetOptions {
    pub seed: Option<u64>,
    /// Sent through the environment parameters side channel.
    pub environment_parameters: HashMap<String, f32>,
}

impl ResetOptions {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }
}
