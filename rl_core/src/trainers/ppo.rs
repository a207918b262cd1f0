// PPO and recurrent PPO on burn.
//
// Rollouts run on the inner (non-autodiff) backend and are sampled on the host;
// updates use clipped surrogate, value and entropy losses over minibatches.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;

use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::env::spaces::{Action, EpisodeStats, Observation};
use crate::env::vec_env::VecEnvironment;
use crate::error::TrainError;
use crate::trainers::buffer::{Minibatch, RolloutBuffer, RolloutStep};
use crate::trainers::callbacks::{CallbackContext, CallbackList};
use crate::trainers::checkpoint::Checkpointable;
use crate::trainers::config::ModelConfig;
use crate::trainers::distributions::ActionLayout;
use crate::trainers::policy::{observations_to_tensor, ActorCriticPolicy, RecurrentState};
use crate::trainers::stats::MetricsLogger;

const EPISODE_WINDOW: usize = 100;

/// Policy and optimizer state, the part of a trainer that gets checkpointed.
pub struct PpoModel<B: AutodiffBackend, O> {
    pub policy: ActorCriticPolicy<B>,
    optimizer: O,
}

impl<B, O> Checkpointable for PpoModel<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ActorCriticPolicy<B>, B>,
{
    fn save_model(&self, path: &Path) -> Result<(), TrainError> {
        self.policy
            .clone()
            .save_file(path.to_path_buf(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .map_err(TrainError::record)
    }

    fn save_optimizer(&self, path: &Path) -> Result<(), TrainError> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        Recorder::<B>::record(&recorder, self.optimizer.to_record(), path.to_path_buf())
            .map_err(TrainError::record)?;
        Ok(())
    }
}

/// Host copy of the LSTM state, `[n_envs * hidden]` each.
#[derive(Debug, Clone)]
struct HostState {
    hidden: Vec<f32>,
    cell: Vec<f32>,
}

impl HostState {
    fn zeros(n_envs: usize, hidden: usize) -> Self {
        Self {
            hidden: vec![0.0; n_envs * hidden],
            cell: vec![0.0; n_envs * hidden],
        }
    }

    fn row(&self, env: usize, hidden: usize) -> Self {
        let range = env * hidden..(env + 1) * hidden;
        Self {
            hidden: self.hidden[range.clone()].to_vec(),
            cell: self.cell[range].to_vec(),
        }
    }
}

struct Inference {
    head: Vec<f32>,
    values: Vec<f32>,
    state: Option<HostState>,
}

#[derive(Default)]
struct UpdateStats {
    policy_losses: Vec<f32>,
    value_losses: Vec<f32>,
    entropy_losses: Vec<f32>,
    clip_fractions: Vec<f32>,
    approx_kls: Vec<f32>,
    loss: f32,
}

/// On-policy learner for both the feed-forward and the recurrent policy.
pub struct PpoTrainer<B: AutodiffBackend, O> {
    pub(crate) model: PpoModel<B, O>,
    pub(crate) config: ModelConfig,
    pub(crate) hparams: serde_json::Value,
    pub(crate) logger: Option<MetricsLogger>,
    pub(crate) layout: ActionLayout,
    /// `[height, width, channels]` of the observations the policy was built for.
    pub(crate) observation_shape: [usize; 3],
    device: B::Device,
    rng: StdRng,
    num_timesteps: u64,
    iterations: u64,
    n_updates: u64,
    episodes: VecDeque<EpisodeStats>,
}

impl<B, O> PpoTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ActorCriticPolicy<B>, B>,
{
    pub fn new(
        policy: ActorCriticPolicy<B>,
        optimizer: O,
        config: ModelConfig,
        layout: ActionLayout,
        observation_shape: [usize; 3],
        hparams: serde_json::Value,
        device: B::Device,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            model: PpoModel { policy, optimizer },
            config,
            hparams,
            logger: None,
            layout,
            observation_shape,
            device,
            rng,
            num_timesteps: 0,
            iterations: 0,
            n_updates: 0,
            episodes: VecDeque::with_capacity(EPISODE_WINDOW),
        }
    }

    pub fn policy(&self) -> &ActorCriticPolicy<B> {
        &self.model.policy
    }

    pub fn model(&self) -> &PpoModel<B, O> {
        &self.model
    }

    pub fn num_timesteps(&self) -> u64 {
        self.num_timesteps
    }

    pub fn set_logger(&mut self, logger: MetricsLogger) {
        self.logger = Some(logger);
    }

    /// Stops gradient flow into the feature extractor.
    pub fn freeze_features_extractor(&mut self) {
        self.model.policy.features_extractor = self.model.policy.features_extractor.clone().no_grad();
    }

    /// Collects rollouts and updates the policy until `total_timesteps` env steps are taken
    /// or a callback asks to stop.
    pub fn learn(
        &mut self,
        env: &mut dyn VecEnvironment,
        total_timesteps: u64,
        callbacks: &mut CallbackList,
    ) -> Result<(), TrainError> {
        let n_envs = env.num_envs();
        let lstm_hidden = self.model.policy.lstm_hidden_size();
        let mut buffer = RolloutBuffer::new(
            self.config.buffer_size,
            n_envs,
            self.layout.action_dim(),
            lstm_hidden.unwrap_or(0),
        );
        let mut last_obs = env.reset()?;
        let mut last_episode_starts = vec![true; n_envs];
        let mut lstm_state = lstm_hidden.map(|hidden| HostState::zeros(n_envs, hidden));
        let start = Instant::now();
        let start_timesteps = self.num_timesteps;

        info!(
            "Training {} for {} timesteps on {} env(s)",
            self.config.policy.algorithm_name(),
            total_timesteps,
            n_envs
        );
        {
            let mut ctx = CallbackContext {
                num_timesteps: self.num_timesteps,
                model: &self.model,
                hyperparameters: &self.hparams,
                logger: self.logger.as_mut(),
            };
            callbacks.on_training_start(&mut ctx)?;
        }

        while self.num_timesteps < total_timesteps {
            let keep_going = self.collect_rollouts(
                env,
                callbacks,
                &mut buffer,
                &mut last_obs,
                &mut last_episode_starts,
                &mut lstm_state,
            )?;
            if !keep_going {
                info!("Training stopped by callback at {} timesteps", self.num_timesteps);
                break;
            }
            self.iterations += 1;
            self.record_rollout_stats(start, start_timesteps);
            self.train(&buffer)?;
            if let Some(logger) = self.logger.as_mut() {
                logger.dump(self.num_timesteps)?;
            }
        }

        let mut ctx = CallbackContext {
            num_timesteps: self.num_timesteps,
            model: &self.model,
            hyperparameters: &self.hparams,
            logger: self.logger.as_mut(),
        };
        callbacks.on_training_end(&mut ctx)
    }

    fn collect_rollouts(
        &mut self,
        env: &mut dyn VecEnvironment,
        callbacks: &mut CallbackList,
        buffer: &mut RolloutBuffer,
        last_obs: &mut Vec<Observation>,
        last_episode_starts: &mut Vec<bool>,
        lstm_state: &mut Option<HostState>,
    ) -> Result<bool, TrainError> {
        let n_envs = env.num_envs();
        let hidden = self.model.policy.lstm_hidden_size().unwrap_or(0);
        let gamma = self.config.hyperparameters.gamma;
        let logits_dim = self.layout.logits_dim();
        let policy = self.model.policy.valid();
        let log_std = match policy.log_std() {
            Some(log_std) => to_host(log_std)?,
            None => Vec::new(),
        };
        buffer.reset();

        while !buffer.is_full() {
            let obs_refs: Vec<&Observation> = last_obs.iter().collect();
            let inference = infer(&policy, &obs_refs, lstm_state.as_ref(), last_episode_starts, &self.device)?;

            let mut actions = Vec::with_capacity(n_envs);
            let mut log_probs = Vec::with_capacity(n_envs);
            for e in 0..n_envs {
                let head = &inference.head[e * logits_dim..(e + 1) * logits_dim];
                let (action, log_prob) = self.layout.sample(head, &log_std, false, &mut self.rng);
                actions.push(action);
                log_probs.push(log_prob);
            }
            let env_actions: Vec<Action> = actions
                .iter()
                .map(|a| Action::from_floats(env.action_space(), a))
                .collect();

            let step = env.step(&env_actions)?;
            self.num_timesteps += n_envs as u64;

            let mut ctx = CallbackContext {
                num_timesteps: self.num_timesteps,
                model: &self.model,
                hyperparameters: &self.hparams,
                logger: self.logger.as_mut(),
            };
            if !callbacks.on_step(&mut ctx)? {
                return Ok(false);
            }

            let mut rewards = step.rewards.clone();
            for (e, info) in step.infos.iter().enumerate() {
                if let Some(episode) = info.episode {
                    if self.episodes.len() == EPISODE_WINDOW {
                        self.episodes.pop_front();
                    }
                    self.episodes.push_back(episode);
                }
                // Bootstrap episodes cut by the step limit from the value of their last observation.
                if step.dones[e] && info.interrupted {
                    if let Some(terminal) = &step.terminal_observations[e] {
                        let state = inference.state.as_ref().map(|s| s.row(e, hidden));
                        let terminal_value = infer(&policy, &[terminal], state.as_ref(), &[false], &self.device)?;
                        rewards[e] += gamma * terminal_value.values[0];
                    }
                }
            }

            buffer.add(RolloutStep {
                observations: last_obs,
                actions: &actions,
                rewards: &rewards,
                episode_starts: last_episode_starts,
                values: &inference.values,
                log_probs: &log_probs,
                lstm_state: lstm_state.as_ref().map(|s| (s.hidden.as_slice(), s.cell.as_slice())),
            });

            *last_obs = step.observations;
            *last_episode_starts = step.dones;
            if inference.state.is_some() {
                *lstm_state = inference.state;
            }
        }

        let obs_refs: Vec<&Observation> = last_obs.iter().collect();
        let last = infer(&policy, &obs_refs, lstm_state.as_ref(), last_episode_starts, &self.device)?;
        let hp = &self.config.hyperparameters;
        buffer.compute_returns_and_advantage(&last.values, last_episode_starts, hp.gamma, hp.gae_lambda);
        Ok(true)
    }

    fn record_rollout_stats(&mut self, start: Instant, start_timesteps: u64) {
        let Some(logger) = self.logger.as_mut() else {
            return;
        };
        if !self.episodes.is_empty() {
            let n = self.episodes.len() as f64;
            let reward = self.episodes.iter().map(|e| e.reward as f64).sum::<f64>() / n;
            let length = self.episodes.iter().map(|e| e.length as f64).sum::<f64>() / n;
            logger.record("rollout/ep_rew_mean", reward);
            logger.record("rollout/ep_len_mean", length);
        }
        let elapsed = start.elapsed().as_secs_f64().max(1e-9);
        logger.record("time/iterations", self.iterations as f64);
        logger.record("time/fps", ((self.num_timesteps - start_timesteps) as f64 / elapsed).floor());
        logger.record("time/time_elapsed", elapsed.floor());
        logger.record("time/total_timesteps", self.num_timesteps as f64);
    }

    fn train(&mut self, buffer: &RolloutBuffer) -> Result<(), TrainError> {
        let hp = self.config.hyperparameters.clone();
        let recurrent = self.model.policy.is_recurrent();
        let mut stats = UpdateStats::default();

        for _ in 0..hp.n_epochs {
            let minibatches = if recurrent {
                buffer.sequence_minibatches(self.config.batch_size, &mut self.rng)
            } else {
                buffer.shuffled_minibatches(self.config.batch_size, &mut self.rng)
            };
            for minibatch in &minibatches {
                self.train_minibatch(buffer, minibatch, &mut stats)?;
            }
        }
        self.n_updates += hp.n_epochs as u64;

        let explained_var = explained_variance(&buffer.values[..buffer.len()], &buffer.returns[..buffer.len()]);
        debug!(
            "Update {}: loss {:.4}, explained variance {:.3}",
            self.n_updates, stats.loss, explained_var
        );

        let std = match self.model.policy.log_std() {
            Some(log_std) => {
                let values = to_host(log_std.exp())?;
                Some(mean(&values))
            }
            None => None,
        };
        let Some(logger) = self.logger.as_mut() else {
            return Ok(());
        };
        logger.record("train/entropy_loss", mean(&stats.entropy_losses));
        logger.record("train/policy_gradient_loss", mean(&stats.policy_losses));
        logger.record("train/value_loss", mean(&stats.value_losses));
        logger.record("train/approx_kl", mean(&stats.approx_kls));
        logger.record("train/clip_fraction", mean(&stats.clip_fractions));
        logger.record("train/loss", stats.loss as f64);
        logger.record("train/explained_variance", explained_var);
        logger.record("train/n_updates", self.n_updates as f64);
        logger.record("train/clip_range", hp.clip_range as f64);
        logger.record("train/learning_rate", hp.learning_rate);
        if let Some(std) = std {
            logger.record("train/std", std);
        }
        Ok(())
    }

    fn train_minibatch(
        &mut self,
        buffer: &RolloutBuffer,
        minibatch: &Minibatch,
        stats: &mut UpdateStats,
    ) -> Result<(), TrainError> {
        let hp = &self.config.hyperparameters;
        let device = &self.device;
        let indices = minibatch.indices();
        let batch = indices.len();

        let observations: Vec<&Observation> = indices.iter().map(|&i| &buffer.observations[i]).collect();
        let obs = observations_to_tensor::<B>(&observations, device);
        let actions = Tensor::<B, 2>::from_data(
            TensorData::new(buffer.gather_actions(indices), [batch, buffer.action_dim()]),
            device,
        );
        let old_log_probs = tensor1::<B>(RolloutBuffer::gather(&buffer.log_probs, indices), device);
        let returns = tensor1::<B>(RolloutBuffer::gather(&buffer.returns, indices), device);
        let mut advantages = RolloutBuffer::gather(&buffer.advantages, indices);
        if hp.normalize_advantage && batch > 1 {
            normalize(&mut advantages);
        }
        let advantages = tensor1::<B>(advantages, device);

        let policy = &self.model.policy;
        let output = match minibatch {
            Minibatch::Sequences { start, len, .. } => {
                let (hidden, cell) = buffer.lstm_state_at(*start);
                let initial =
                    RecurrentState::from_host(hidden, cell, buffer.n_envs(), buffer.lstm_hidden(), device);
                let starts = tensor1::<B>(RolloutBuffer::gather(&buffer.episode_starts, indices), device);
                policy.forward_sequences(obs, initial, starts, buffer.n_envs(), *len)
            }
            Minibatch::Shuffled(_) => policy.forward(obs),
        };
        let log_prob = self
            .layout
            .log_prob(output.action_head.clone(), policy.log_std(), actions);
        let entropy = self.layout.entropy(output.action_head, policy.log_std());

        let log_ratio = log_prob - old_log_probs;
        let ratio = log_ratio.clone().exp();
        let surrogate = advantages.clone() * ratio.clone();
        let clipped = advantages * ratio.clone().clamp(1.0 - hp.clip_range, 1.0 + hp.clip_range);
        let policy_loss = surrogate.min_pair(clipped).mean().neg();
        let value_loss = (returns - output.values).powf_scalar(2.0).mean();
        let entropy_loss = entropy.mean().neg();
        let loss = policy_loss.clone()
            + entropy_loss.clone().mul_scalar(hp.ent_coef)
            + value_loss.clone().mul_scalar(hp.vf_coef);

        let ratios = to_host(ratio.detach())?;
        let log_ratios = to_host(log_ratio.detach())?;
        let clipped_count = ratios.iter().filter(|r| (*r - 1.0).abs() > hp.clip_range).count();
        stats.clip_fractions.push(clipped_count as f32 / batch as f32);
        let kl: f32 = ratios.iter().zip(&log_ratios).map(|(r, lr)| (r - 1.0) - lr).sum();
        stats.approx_kls.push(kl / batch as f32);
        stats.policy_losses.push(scalar(policy_loss));
        stats.value_losses.push(scalar(value_loss));
        stats.entropy_losses.push(scalar(entropy_loss));
        stats.loss = scalar(loss.clone());

        let learning_rate = hp.learning_rate;
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model.policy);
        let policy = self.model.policy.clone();
        self.model.policy = self.model.optimizer.step(learning_rate, policy, grads);
        Ok(())
    }
}

fn infer<IB: Backend>(
    policy: &ActorCriticPolicy<IB>,
    observations: &[&Observation],
    state: Option<&HostState>,
    episode_starts: &[bool],
    device: &IB::Device,
) -> Result<Inference, TrainError> {
    let batch = observations.len();
    let obs = observations_to_tensor::<IB>(observations, device);
    let (output, next) = match (policy.lstm_hidden_size(), state) {
        (Some(hidden), Some(state)) => {
            let recurrent =
                RecurrentState::from_host(state.hidden.clone(), state.cell.clone(), batch, hidden, device);
            let starts = episode_starts.iter().map(|&s| if s { 1.0 } else { 0.0 }).collect();
            let (output, next) = policy.forward_step(obs, recurrent, tensor1::<IB>(starts, device));
            let next = HostState {
                hidden: to_host(next.hidden)?,
                cell: to_host(next.cell)?,
            };
            (output, Some(next))
        }
        _ => (policy.forward(obs), None),
    };
    Ok(Inference {
        head: to_host(output.action_head)?,
        values: to_host(output.values)?,
        state: next,
    })
}

fn tensor1<B: Backend>(values: Vec<f32>, device: &B::Device) -> Tensor<B, 1> {
    let len = values.len();
    Tensor::from_data(TensorData::new(values, [len]), device)
}

fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, TrainError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(TrainError::tensor)
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem::<f32>()
}

fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

fn normalize(values: &mut [f32]) {
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (n - 1.0);
    let std = var.sqrt() + 1e-8;
    for v in values.iter_mut() {
        *v = (*v - mean) / std;
    }
}

/// `1 - Var[y - y_pred] / Var[y]`; NaN when the returns are constant.
pub fn explained_variance(predictions: &[f32], targets: &[f32]) -> f64 {
    let variance = |xs: &mut dyn Iterator<Item = f64>| {
        let xs: Vec<f64> = xs.collect();
        let n = xs.len().max(1) as f64;
        let mean = xs.iter().sum::<f64>() / n;
        xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
    };
    let var_y = variance(&mut targets.iter().map(|&y| y as f64));
    if var_y == 0.0 {
        return f64::NAN;
    }
    let var_residual = variance(&mut targets.iter().zip(predictions).map(|(&y, &p)| (y - p) as f64));
    1.0 - var_residual / var_y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explained_variance() {
        let targets = [1.0, 2.0, 3.0, 4.0];
        assert!((explained_variance(&targets, &targets) - 1.0).abs() < 1e-12);
        assert!(explained_variance(&[0.0; 4], &[2.0; 4]).is_nan());
        let ev = explained_variance(&[2.5; 4], &targets);
        assert!(ev.abs() < 1e-12);
    }

    #[test]
    fn test_normalize_advantages() {
        let mut advantages = vec![1.0, 2.0, 3.0];
        normalize(&mut advantages);
        assert!(advantages[1].abs() < 1e-6);
        assert!((advantages[2] - 1.0).abs() < 1e-5);
    }
}
