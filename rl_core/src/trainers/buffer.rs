// Rollout buffer - on-policy storage with GAE advantage estimation.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::env::spaces::Observation;

/// Per-step data handed to [`RolloutBuffer::add`], one entry per env.
pub struct RolloutStep<'a> {
    pub observations: &'a [Observation],
    pub actions: &'a [Vec<f32>],
    pub rewards: &'a [f32],
    pub episode_starts: &'a [bool],
    pub values: &'a [f32],
    pub log_probs: &'a [f32],
    /// LSTM `(hidden, cell)` fed into this step, `[n_envs * hidden]` each.
    pub lstm_state: Option<(&'a [f32], &'a [f32])>,
}

/// A minibatch as indices into the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Minibatch {
    /// Independent transitions.
    Shuffled(Vec<usize>),
    /// One contiguous run of `len` steps per env starting at `start`.
    /// Indices are sequence-major: env by env, time within.
    Sequences { start: usize, len: usize, indices: Vec<usize> },
}

impl Minibatch {
    pub fn indices(&self) -> &[usize] {
        match self {
            Minibatch::Shuffled(indices) => indices,
            Minibatch::Sequences { indices, .. } => indices,
        }
    }
}

/// Step-major storage: entry `t * n_envs + e` is step `t` of env `e`.
pub struct RolloutBuffer {
    buffer_size: usize,
    n_envs: usize,
    action_dim: usize,
    lstm_hidden: usize,
    pub observations: Vec<Observation>,
    pub actions: Vec<f32>,
    pub rewards: Vec<f32>,
    pub episode_starts: Vec<f32>,
    pub values: Vec<f32>,
    pub log_probs: Vec<f32>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
    pub lstm_hidden_states: Vec<f32>,
    pub lstm_cell_states: Vec<f32>,
    pos: usize,
}

impl RolloutBuffer {
    pub fn new(buffer_size: usize, n_envs: usize, action_dim: usize, lstm_hidden: usize) -> Self {
        let capacity = buffer_size * n_envs;
        Self {
            buffer_size,
            n_envs,
            action_dim,
            lstm_hidden,
            observations: Vec::with_capacity(capacity),
            actions: Vec::with_capacity(capacity * action_dim),
            rewards: Vec::with_capacity(capacity),
            episode_starts: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            log_probs: Vec::with_capacity(capacity),
            advantages: vec![0.0; capacity],
            returns: vec![0.0; capacity],
            lstm_hidden_states: Vec::with_capacity(capacity * lstm_hidden),
            lstm_cell_states: Vec::with_capacity(capacity * lstm_hidden),
            pos: 0,
        }
    }

    pub fn reset(&mut self) {
        self.observations.clear();
        self.actions.clear();
        self.rewards.clear();
        self.episode_starts.clear();
        self.values.clear();
        self.log_probs.clear();
        self.advantages.iter_mut().for_each(|a| *a = 0.0);
        self.returns.iter_mut().for_each(|r| *r = 0.0);
        self.lstm_hidden_states.clear();
        self.lstm_cell_states.clear();
        self.pos = 0;
    }

    pub fn add(&mut self, step: RolloutStep<'_>) {
        self.observations.extend_from_slice(step.observations);
        for action in step.actions {
            self.actions.extend_from_slice(&action[..self.action_dim.min(action.len())]);
        }
        self.rewards.extend_from_slice(step.rewards);
        self.episode_starts
            .extend(step.episode_starts.iter().map(|&s| if s { 1.0 } else { 0.0 }));
        self.values.extend_from_slice(step.values);
        self.log_probs.extend_from_slice(step.log_probs);
        if let Some((hidden, cell)) = step.lstm_state {
            self.lstm_hidden_states.extend_from_slice(hidden);
            self.lstm_cell_states.extend_from_slice(cell);
        }
        self.pos += 1;
    }

    pub fn is_full(&self) -> bool {
        self.pos >= self.buffer_size
    }

    pub fn len(&self) -> usize {
        self.pos * self.n_envs
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn n_envs(&self) -> usize {
        self.n_envs
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn lstm_hidden(&self) -> usize {
        self.lstm_hidden
    }

    /// Generalized advantage estimation over the stored steps.
    ///
    /// `last_values` are the value estimates of the observations following the
    /// last stored step and `dones` whether those steps ended an episode.
    pub fn compute_returns_and_advantage(&mut self, last_values: &[f32], dones: &[bool], gamma: f32, gae_lambda: f32) {
        let steps = self.pos;
        let n = self.n_envs;
        for e in 0..n {
            let mut last_gae = 0.0;
            for t in (0..steps).rev() {
                let idx = t * n + e;
                let (next_non_terminal, next_value) = if t + 1 == steps {
                    (if dones[e] { 0.0 } else { 1.0 }, last_values[e])
                } else {
                    let next = (t + 1) * n + e;
                    (1.0 - self.episode_starts[next], self.values[next])
                };
                let delta = self.rewards[idx] + gamma * next_value * next_non_terminal - self.values[idx];
                last_gae = delta + gamma * gae_lambda * next_non_terminal * last_gae;
                self.advantages[idx] = last_gae;
            }
        }
        for i in 0..steps * n {
            self.returns[i] = self.advantages[i] + self.values[i];
        }
    }

    /// Shuffled minibatches of at most `batch_size` transitions.
    pub fn shuffled_minibatches(&self, batch_size: usize, rng: &mut impl Rng) -> Vec<Minibatch> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        indices
            .chunks(batch_size.max(1))
            .map(|chunk| Minibatch::Shuffled(chunk.to_vec()))
            .collect()
    }

    /// Contiguous time chunks covering every env, in shuffled order.
    ///
    /// Each chunk spans `batch_size / n_envs` steps so a minibatch holds about
    /// `batch_size` transitions.
    pub fn sequence_minibatches(&self, batch_size: usize, rng: &mut impl Rng) -> Vec<Minibatch> {
        let seq_len = (batch_size / self.n_envs).max(1);
        let mut batches: Vec<Minibatch> = (0..self.pos)
            .step_by(seq_len)
            .map(|start| {
                let len = seq_len.min(self.pos - start);
                let indices = (0..self.n_envs)
                    .flat_map(|e| (start..start + len).map(move |t| t * self.n_envs + e))
                    .collect();
                Minibatch::Sequences { start, len, indices }
            })
            .collect();
        batches.shuffle(rng);
        batches
    }

    pub fn gather_actions(&self, indices: &[usize]) -> Vec<f32> {
        let mut out = Vec::with_capacity(indices.len() * self.action_dim);
        for &i in indices {
            out.extend_from_slice(&self.actions[i * self.action_dim..(i + 1) * self.action_dim]);
        }
        out
    }

    pub fn gather(values: &[f32], indices: &[usize]) -> Vec<f32> {
        indices.iter().map(|&i| values[i]).collect()
    }

    /// LSTM `(hidden, cell)` that was fed into step `start` of every env.
    pub fn lstm_state_at(&self, start: usize) -> (Vec<f32>, Vec<f32>) {
        let h = self.lstm_hidden;
        let from = start * self.n_envs * h;
        let to = from + self.n_envs * h;
        (
            self.lstm_hidden_states[from..to].to_vec(),
            self.lstm_cell_states[from..to].to_vec(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn filled(steps: usize, n_envs: usize) -> RolloutBuffer {
        let mut buffer = RolloutBuffer::new(steps, n_envs, 1, 0);
        let obs = vec![Observation::zeros([1, 1, 1]); n_envs];
        let actions = vec![vec![0.0]; n_envs];
        let ones = vec![1.0; n_envs];
        let starts = vec![false; n_envs];
        for _ in 0..steps {
            buffer.add(RolloutStep {
                observations: &obs,
                actions: &actions,
                rewards: &ones,
                episode_starts: &starts,
                values: &ones,
                log_probs: &ones,
                lstm_state: None,
            });
        }
        buffer
    }

    #[test]
    fn test_shuffled_minibatches_cover_buffer() {
        let buffer = filled(10, 2);
        let mut rng = StdRng::seed_from_u64(0);
        let batches = buffer.shuffled_minibatches(6, &mut rng);
        assert_eq!(batches.len(), 4);
        let mut all: Vec<usize> = batches.iter().flat_map(|b| b.indices().to_vec()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequence_minibatches_are_contiguous_per_env() {
        let buffer = filled(5, 2);
        let mut rng = StdRng::seed_from_u64(0);
        let mut batches = buffer.sequence_minibatches(4, &mut rng);
        batches.sort_by_key(|b| match b {
            Minibatch::Sequences { start, .. } => *start,
            Minibatch::Shuffled(_) => 0,
        });
        assert_eq!(
            batches[0],
            Minibatch::Sequences { start: 0, len: 2, indices: vec![0, 2, 1, 3] }
        );
        assert_eq!(
            batches[2],
            Minibatch::Sequences { start: 4, len: 1, indices: vec![8, 9] }
        );
    }
}
