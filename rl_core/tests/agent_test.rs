mod common;

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use chamber_rl::agent::{AgentOptions, TrainOutcome, TrainingAgent};
use chamber_rl::env::{DummyVecEnv, VecEnvironment};
use chamber_rl::trainers::{
    BurnTrainerFactory, CallbackList, EncoderKind, MetricsLogger, ModelConfig, PolicyKind, PolicyTrainer,
    TrainerFactory,
};
use chamber_rl::{ConfigError, EnvError, TrainError};
use common::StubEnv;

/// Records what the agent asks of its trainer without training anything.
#[derive(Clone, Default)]
struct RecordingFactory {
    builds: Rc<Cell<usize>>,
    learned: Rc<RefCell<Vec<u64>>>,
}

struct RecordingTrainer {
    policy: PolicyKind,
    learned: Rc<RefCell<Vec<u64>>>,
}

impl TrainerFactory for RecordingFactory {
    fn build(&self, config: &ModelConfig, _env: &dyn VecEnvironment) -> Result<Box<dyn PolicyTrainer>, TrainError> {
        self.builds.set(self.builds.get() + 1);
        Ok(Box::new(RecordingTrainer {
            policy: config.policy,
            learned: Rc::clone(&self.learned),
        }))
    }
}

impl PolicyTrainer for RecordingTrainer {
    fn policy_kind(&self) -> PolicyKind {
        self.policy
    }

    fn set_logger(&mut self, _logger: MetricsLogger) {}

    fn freeze_features_extractor(&mut self) {}

    fn features_extractor_requires_grad(&self) -> Vec<bool> {
        vec![true]
    }

    fn describe(&self) -> String {
        "recording trainer".to_string()
    }

    fn num_params(&self) -> usize {
        0
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn learn(
        &mut self,
        _env: &mut dyn VecEnvironment,
        total_timesteps: u64,
        _callbacks: &mut CallbackList,
    ) -> Result<(), TrainError> {
        self.learned.borrow_mut().push(total_timesteps);
        Ok(())
    }

    fn save(&self, _path: &Path) -> Result<(), TrainError> {
        Ok(())
    }

    fn save_encoder_policy_network(&self, _dir: &Path) -> Result<(), TrainError> {
        Ok(())
    }
}

fn options(policy: &str, encoder: &str) -> AgentOptions {
    AgentOptions {
        policy: policy.to_string(),
        encoder_type: encoder.to_string(),
        encoder_dim: 32,
        batch_size: 8,
        buffer_size: 16,
        summary_freq: 16,
        ..Default::default()
    }
}

#[test]
fn test_learn_receives_the_episode_budget() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let mut agent = TrainingAgent::with_factory("chick_1", dir.path(), options("ppo", "small"), factory.clone()).unwrap();
    let mut env = StubEnv::new(10, 100);

    let outcome = agent.train(&mut env, 10).unwrap();

    assert_eq!(outcome, TrainOutcome::Completed { timesteps: 1000 });
    assert_eq!(*factory.learned.borrow(), vec![1000]);
    assert!(!env.closed);
    assert!(dir.path().join("chick_1/model_properties.txt").exists());
    assert!(dir.path().join("chick_1/monitor.csv").exists());
}

#[test]
fn test_overflowing_budget_fails_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let mut agent = TrainingAgent::with_factory("chick_6", dir.path(), options("ppo", "small"), factory.clone()).unwrap();
    let mut env = StubEnv::new(10, u64::MAX / 2);

    let result = agent.train(&mut env, 3);

    assert!(matches!(
        result,
        Err(TrainError::Env(EnvError::StepBudgetOverflow { episodes: 3 }))
    ));
    assert_eq!(factory.builds.get(), 0);
    assert!(factory.learned.borrow().is_empty());
}

#[test]
fn test_failed_env_check_skips_training() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let mut agent = TrainingAgent::with_factory("chick_2", dir.path(), options("ppo", "small"), factory.clone()).unwrap();
    let mut env = StubEnv::flat();

    let outcome = agent.train(&mut env, 10).unwrap();

    assert!(matches!(outcome, TrainOutcome::EnvCheckFailed { .. }));
    assert_eq!(factory.builds.get(), 0);
    assert!(factory.learned.borrow().is_empty());
}

#[test]
fn test_policy_selection() {
    let dir = tempfile::tempdir().unwrap();
    let envs = DummyVecEnv::single(StubEnv::new(10, 100), None);

    let agent = TrainingAgent::new("ppo_agent", dir.path(), options("PPO", "small")).unwrap();
    let trainer = agent.build_trainer(&envs).unwrap();
    assert_eq!(trainer.policy_kind(), PolicyKind::Ppo);
    assert!(!trainer.describe().contains("lstm"));

    let mut recurrent = options("recurrent_ppo", "small");
    recurrent.hyperparameters.lstm_hidden_size = 16;
    let agent = TrainingAgent::new("rppo_agent", dir.path(), recurrent).unwrap();
    let trainer = agent.build_trainer(&envs).unwrap();
    assert_eq!(trainer.policy_kind(), PolicyKind::RecurrentPpo);
    assert!(trainer.describe().contains("lstm"));

    let unknown = TrainingAgent::new("sac_agent", dir.path(), options("sac", "small"));
    assert!(matches!(unknown, Err(TrainError::Config(ConfigError::UnknownPolicy(_)))));
}

#[test]
fn test_encoder_selection() {
    let dir = tempfile::tempdir().unwrap();

    let agent = TrainingAgent::new("small", dir.path(), options("ppo", "small")).unwrap();
    assert!(agent.model_config().encoder.args.is_none());

    let agent = TrainingAgent::new("medium", dir.path(), options("ppo", "medium")).unwrap();
    let args = agent.model_config().encoder.args.clone().unwrap();
    assert_eq!(args.class, EncoderKind::Medium);
    assert_eq!(args.features_dim, 32);
    assert!(args.object_background.is_none());

    let mut simclr = options("ppo", "simclr");
    simclr.object_background = Some("ship_A".into());
    let agent = TrainingAgent::new("simclr", dir.path(), simclr).unwrap();
    let args = agent.model_config().encoder.args.clone().unwrap();
    assert_eq!(args.class, EncoderKind::SimClr);
    assert_eq!(args.object_background.as_deref(), Some("ship_A"));
}

#[test]
fn test_frozen_encoder_reports_no_grad() {
    let dir = tempfile::tempdir().unwrap();
    let envs = DummyVecEnv::single(StubEnv::new(10, 100), None);

    let mut frozen = options("ppo", "small");
    frozen.train_encoder = false;
    let agent = TrainingAgent::new("frozen", dir.path(), frozen).unwrap();
    let trainer = agent.build_trainer(&envs).unwrap();
    let grads = trainer.features_extractor_requires_grad();
    assert!(!grads.is_empty());
    assert!(grads.iter().all(|&g| !g));

    let agent = TrainingAgent::new("trained", dir.path(), options("ppo", "small")).unwrap();
    let trainer = agent.build_trainer(&envs).unwrap();
    assert!(trainer.features_extractor_requires_grad().iter().all(|&g| g));
}

#[test]
fn test_callbacks_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let agent = TrainingAgent::with_factory("chick_3", dir.path(), options("ppo", "small"), BurnTrainerFactory).unwrap();
    assert_eq!(agent.callbacks().len(), 3);
    assert_eq!(agent.path(), dir.path().join("chick_3"));
}

#[test]
fn test_short_training_run_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options("ppo", "small");
    opts.hyperparameters.n_epochs = 1;
    let mut agent = TrainingAgent::new("chick_4", dir.path(), opts).unwrap();
    // 8 steps per episode budget, 4 episodes: two rollouts of 16 steps
    let mut env = StubEnv::new(4, 8);

    let outcome = agent.train(&mut env, 4).unwrap();
    assert_eq!(outcome, TrainOutcome::Completed { timesteps: 32 });

    let root = dir.path().join("chick_4");
    for file in [
        "model.mpk",
        "model_snapshots/feature_extractor.mpk",
        "model_snapshots/policy_net.mpk",
        "model_properties.txt",
        "monitor.csv",
        "progress.csv",
        "metrics.jsonl",
        "checkpoints/supervised_model_16_steps.mpk",
        "checkpoints/supervised_model_optimizer_16_steps.mpk",
        "plots/reward_graph_chick_4.png",
    ] {
        assert!(root.join(file).exists(), "missing {}", file);
    }
    let properties = fs::read_to_string(root.join("model_properties.txt")).unwrap();
    assert!(properties.contains("Total timesteps: 32"));
}

#[test]
fn test_short_recurrent_training_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options("lstm", "small");
    opts.hyperparameters.n_epochs = 1;
    opts.hyperparameters.lstm_hidden_size = 8;
    let mut agent = TrainingAgent::new("chick_5", dir.path(), opts).unwrap();
    let mut env = StubEnv::new(5, 16);

    let outcome = agent.train(&mut env, 1).unwrap();
    assert_eq!(outcome, TrainOutcome::Completed { timesteps: 16 });
    assert!(dir.path().join("chick_5/model.mpk").exists());
}
