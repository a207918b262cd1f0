mod common;

use chamber_rl::env::{check_env, load_results, Action, DummyVecEnv, Environment, Monitor, ResetOptions, VecEnvironment};
use chamber_rl::CheckError;
use common::StubEnv;

#[test]
fn test_monitor_log_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = Monitor::new(StubEnv::new(3, 100), dir.path(), Some("chamber")).unwrap();

    for episode in 0..2 {
        env.reset(&ResetOptions::default()).unwrap();
        let action = Action::Discrete(vec![if episode == 0 { 1 } else { 0 }]);
        loop {
            let step = env.step(&action).unwrap();
            if step.done {
                let stats = step.info.episode.expect("final step carries episode stats");
                assert_eq!(stats.length, 3);
                break;
            }
        }
    }
    assert_eq!(env.episode_rewards(), &[3.0, 0.0]);
    drop(env);

    let results = load_results(dir.path()).unwrap();
    assert_eq!(results.env_id, "chamber");
    assert_eq!(results.rewards, vec![3.0, 0.0]);
    assert_eq!(results.lengths, vec![3, 3]);
    assert_eq!(results.cumulative_steps(), vec![3, 6]);
    assert!(results.times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_check_env_accepts_image_env() {
    let mut env = StubEnv::new(5, 100);
    check_env(&mut env).unwrap();
}

#[test]
fn test_check_env_rejects_flat_observations() {
    let mut env = StubEnv::flat();
    assert!(matches!(check_env(&mut env), Err(CheckError::ObservationSpace(_))));
}

#[test]
fn test_vec_env_resets_finished_episodes() {
    let dir = tempfile::tempdir().unwrap();
    let monitored = Monitor::new(StubEnv::new(2, 100), dir.path(), None).unwrap();
    let mut envs = DummyVecEnv::single(monitored, Some(7));
    envs.reset().unwrap();

    let actions = vec![Action::Discrete(vec![1])];
    let first = envs.step(&actions).unwrap();
    assert_eq!(first.dones, vec![false]);
    assert!(first.terminal_observations[0].is_none());

    let second = envs.step(&actions).unwrap();
    assert_eq!(second.dones, vec![true]);
    assert!(second.terminal_observations[0].is_some());
    assert_eq!(second.infos[0].episode.map(|e| e.reward), Some(2.0));
}
