// Environment checker - runs one reset and one step and validates what comes back.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::env::spaces::{ActionSpace, Observation, ObservationSpace, ResetOptions};
use crate::env::Environment;
use crate::error::CheckError;

/// Checks that `env` follows the interface the trainer relies on.
///
/// Returns the first violation found. The environment is left mid-episode, so
/// callers reset it before use.
pub fn check_env<E: Environment + ?Sized>(env: &mut E) -> Result<(), CheckError> {
    let observation_space = env.observation_space().clone();
    let expected = check_observation_space(&observation_space)?;
    let action_space = env.action_space().clone();
    check_action_space(&action_space)?;

    let obs = env.reset(&ResetOptions::default())?;
    check_observation("reset", &obs, &expected)?;

    let mut rng = StdRng::seed_from_u64(0);
    let action = action_space.sample(&mut rng);
    let step = env.step(&action)?;
    check_observation("step", &step.observation, &expected)?;
    if !step.reward.is_finite() {
        return Err(CheckError::NonFiniteReward(step.reward));
    }

    debug!("Environment check passed: observation {:?}, actions {:?}", expected, action_space);
    Ok(())
}

fn check_observation_space(space: &ObservationSpace) -> Result<[usize; 3], CheckError> {
    match space.hwc() {
        Some(shape) if shape.iter().all(|&d| d > 0) => Ok(shape),
        _ => Err(CheckError::ObservationSpace(space.shape.clone())),
    }
}

fn check_action_space(space: &ActionSpace) -> Result<(), CheckError> {
    match space {
        ActionSpace::Discrete(branches) if branches.is_empty() => {
            Err(CheckError::ActionSpace("discrete space has no branches".into()))
        }
        ActionSpace::Discrete(branches) if branches.iter().any(|&n| n == 0) => Err(
            CheckError::ActionSpace(format!("discrete branch with no choices in {:?}", branches)),
        ),
        ActionSpace::Continuous(0) => Err(CheckError::ActionSpace("continuous space has no dimensions".into())),
        _ => Ok(()),
    }
}

fn check_observation(context: &'static str, obs: &Observation, expected: &[usize; 3]) -> Result<(), CheckError> {
    if &obs.shape != expected {
        return Err(CheckError::ObservationShape {
            context,
            expected: expected.to_vec(),
            actual: obs.shape.to_vec(),
        });
    }
    let size: usize = expected.iter().product();
    if obs.data.len() != size {
        return Err(CheckError::ObservationSize {
            shape: expected.to_vec(),
            expected: size,
            actual: obs.data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_space_must_be_image() {
        assert!(check_observation_space(&ObservationSpace { shape: vec![4] }).is_err());
        assert!(check_observation_space(&ObservationSpace::image(0, 64, 3)).is_err());
        assert_eq!(check_observation_space(&ObservationSpace::image(64, 64, 3)).unwrap(), [64, 64, 3]);
    }

    #[test]
    fn test_action_space_validation() {
        assert!(check_action_space(&ActionSpace::Discrete(vec![])).is_err());
        assert!(check_action_space(&ActionSpace::Discrete(vec![3, 0])).is_err());
        assert!(check_action_space(&ActionSpace::Continuous(0)).is_err());
        assert!(check_action_space(&ActionSpace::Continuous(2)).is_ok());
    }

    #[test]
    fn test_observation_shape_mismatch() {
        let obs = Observation::zeros([2, 2, 1]);
        let err = check_observation("reset", &obs, &[2, 2, 3]).unwrap_err();
        assert!(matches!(err, CheckError::ObservationShape { context: "reset", .. }));
    }
}
