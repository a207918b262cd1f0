// Trainers - burn PPO and recurrent PPO with the callbacks, loggers and
// checkpointing around them.

pub mod buffer;
pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod distributions;
pub mod encoders;
pub mod policy;
pub mod ppo;
pub mod stats;
pub mod tensorboard;
pub mod trainer;

pub use callbacks::{Callback, CallbackContext, CallbackList, CheckpointCallback, HParamCallback, SaveBestModelCallback};
pub use checkpoint::{CheckpointManager, Checkpointable};
pub use config::{EncoderSelection, ExtractorArgs, ModelConfig, PolicyKind, PpoHyperparameters};
pub use encoders::EncoderKind;
pub use stats::{MetricsLogger, StatsWriter};
pub use tensorboard::TensorBoardWriter;
pub use trainer::{BurnTrainerFactory, PolicyTrainer, TrainerFactory, TrainingBackend};
