// Actor-critic policy - feature extractor, optional LSTM, action and value heads.

use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig, LstmState};
use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::env::spaces::Observation;
use crate::error::ConfigError;
use crate::trainers::distributions::ActionLayout;
use crate::trainers::encoders::{FeaturesExtractor, FeaturesExtractorConfig};

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub extractor: FeaturesExtractorConfig,
    pub layout: ActionLayout,
    /// Hidden size of the LSTM; `None` for a feed-forward policy.
    pub lstm_hidden_size: Option<usize>,
    pub log_std_init: f32,
}

impl PolicyConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ActorCriticPolicy<B>, ConfigError> {
        let features_extractor = self.extractor.init(device)?;
        let features_dim = self.extractor.features_dim;
        let lstm = self
            .lstm_hidden_size
            .map(|hidden| LstmConfig::new(features_dim, hidden, true).init(device));
        let latent_dim = self.lstm_hidden_size.unwrap_or(features_dim);

        let action_net = LinearConfig::new(latent_dim, self.layout.logits_dim()).init(device);
        let value_net = LinearConfig::new(latent_dim, 1).init(device);
        let log_std = match self.layout {
            ActionLayout::Gaussian(dim) => Some(Param::from_tensor(Tensor::full([dim], self.log_std_init, device))),
            ActionLayout::Categorical(_) => None,
        };

        Ok(ActorCriticPolicy {
            features_extractor,
            head: PolicyHead {
                lstm,
                action_net,
                value_net,
                log_std,
                lstm_hidden: self.lstm_hidden_size.unwrap_or(0),
            },
        })
    }
}

/// Recurrent state carried between steps, `[batch, hidden]` each.
#[derive(Debug, Clone)]
pub struct RecurrentState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Tensor<B, 2>,
}

impl<B: Backend> RecurrentState<B> {
    pub fn zeros(batch: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::zeros([batch, hidden_size], device),
            cell: Tensor::zeros([batch, hidden_size], device),
        }
    }

    pub fn from_host(hidden: Vec<f32>, cell: Vec<f32>, batch: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::from_data(TensorData::new(hidden, [batch, hidden_size]), device),
            cell: Tensor::from_data(TensorData::new(cell, [batch, hidden_size]), device),
        }
    }

    /// Zeroes the rows whose `keep` entry is 0.
    fn masked(self, keep: Tensor<B, 2>) -> Self {
        let [_, hidden_size] = self.hidden.dims();
        let keep = keep.repeat_dim(1, hidden_size);
        Self {
            hidden: self.hidden * keep.clone(),
            cell: self.cell * keep,
        }
    }
}

/// Head output for a batch of steps.
#[derive(Debug, Clone)]
pub struct PolicyOutput<B: Backend> {
    /// Logits or Gaussian means, `[batch, logits_dim]`.
    pub action_head: Tensor<B, 2>,
    pub values: Tensor<B, 1>,
}

/// Everything after the feature extractor.
#[derive(Module, Debug)]
pub struct PolicyHead<B: Backend> {
    pub lstm: Option<Lstm<B>>,
    pub action_net: Linear<B>,
    pub value_net: Linear<B>,
    /// State-independent log standard deviation, continuous actions only.
    pub log_std: Option<Param<Tensor<B, 1>>>,
    lstm_hidden: usize,
}

impl<B: Backend> PolicyHead<B> {
    fn forward(&self, latent: Tensor<B, 2>) -> PolicyOutput<B> {
        let [batch, _] = latent.dims();
        PolicyOutput {
            action_head: self.action_net.forward(latent.clone()),
            values: self.value_net.forward(latent).reshape([batch]),
        }
    }
}

#[derive(Module, Debug)]
pub struct ActorCriticPolicy<B: Backend> {
    pub features_extractor: FeaturesExtractor<B>,
    pub head: PolicyHead<B>,
}

impl<B: Backend> ActorCriticPolicy<B> {
    pub fn is_recurrent(&self) -> bool {
        self.head.lstm.is_some()
    }

    pub fn log_std(&self) -> Option<Tensor<B, 1>> {
        self.head.log_std.as_ref().map(|p| p.val())
    }

    fn heads(&self, latent: Tensor<B, 2>) -> PolicyOutput<B> {
        self.head.forward(latent)
    }

    /// Feed-forward pass over `[batch, channels, height, width]` observations.
    pub fn forward(&self, obs: Tensor<B, 4>) -> PolicyOutput<B> {
        self.heads(self.features_extractor.forward(obs))
    }

    /// Single recurrent step for `[batch, ...]` observations.
    ///
    /// `episode_starts` (`[batch]`, 1.0 at the first step of an episode) resets
    /// the matching state rows before the step.
    pub fn forward_step(
        &self,
        obs: Tensor<B, 4>,
        state: RecurrentState<B>,
        episode_starts: Tensor<B, 1>,
    ) -> (PolicyOutput<B>, RecurrentState<B>) {
        let features = self.features_extractor.forward(obs);
        match &self.head.lstm {
            Some(lstm) => {
                let (latent, next) = lstm_step(lstm, features, state, episode_starts);
                (self.heads(latent), next)
            }
            None => (self.heads(features), state),
        }
    }

    /// Recurrent pass over `sequences` sequences of `seq_len` steps.
    ///
    /// Observations and episode starts are ordered sequence-major
    /// (`s * seq_len + t`); `initial` holds each sequence's state before its
    /// first step.
    pub fn forward_sequences(
        &self,
        obs: Tensor<B, 4>,
        initial: RecurrentState<B>,
        episode_starts: Tensor<B, 1>,
        sequences: usize,
        seq_len: usize,
    ) -> PolicyOutput<B> {
        let features = self.features_extractor.forward(obs);
        let Some(lstm) = &self.head.lstm else {
            return self.heads(features);
        };

        let [_, features_dim] = features.dims();
        let features = features.reshape([sequences, seq_len, features_dim]);
        let starts = episode_starts.reshape([sequences, seq_len]);

        let mut state = initial;
        let mut outputs = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let x = features.clone().narrow(1, t, 1).reshape([sequences, features_dim]);
            let start = starts.clone().narrow(1, t, 1).reshape([sequences]);
            let (latent, next) = lstm_step(lstm, x, state, start);
            outputs.push(latent);
            state = next;
        }
        let latent: Tensor<B, 3> = Tensor::stack(outputs, 1);
        let [_, _, hidden] = latent.dims();
        self.heads(latent.reshape([sequences * seq_len, hidden]))
    }

    pub fn lstm_hidden_size(&self) -> Option<usize> {
        self.head.lstm.as_ref().map(|_| self.head.lstm_hidden)
    }
}

fn lstm_step<B: Backend>(
    lstm: &Lstm<B>,
    features: Tensor<B, 2>,
    state: RecurrentState<B>,
    episode_starts: Tensor<B, 1>,
) -> (Tensor<B, 2>, RecurrentState<B>) {
    let [batch, features_dim] = features.dims();
    let keep = episode_starts.neg().add_scalar(1.0).reshape([batch, 1]);
    let state = state.masked(keep);
    let (output, next) = lstm.forward(
        features.reshape([batch, 1, features_dim]),
        Some(LstmState::new(state.cell, state.hidden)),
    );
    let [_, _, hidden] = output.dims();
    (
        output.reshape([batch, hidden]),
        RecurrentState {
            hidden: next.hidden,
            cell: next.cell,
        },
    )
}

/// Stacks HWC byte observations into a `[batch, channels, height, width]` tensor in `[0, 1]`.
pub fn observations_to_tensor<B: Backend>(observations: &[&Observation], device: &B::Device) -> Tensor<B, 4> {
    let [height, width, channels] = observations
        .first()
        .map(|obs| obs.shape)
        .unwrap_or([0, 0, 0]);
    let plane = height * width;
    let mut data = vec![0.0f32; observations.len() * channels * plane];
    for (n, obs) in observations.iter().enumerate() {
        let base = n * channels * plane;
        for (i, &value) in obs.data.iter().enumerate() {
            let c = i % channels;
            let pixel = i / channels;
            data[base + c * plane + pixel] = value as f32 / 255.0;
        }
    }
    Tensor::from_data(
        TensorData::new(data, [observations.len(), channels, height, width]),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainers::encoders::EncoderKind;
    use burn::backend::NdArray;

    fn config(lstm: Option<usize>) -> PolicyConfig {
        PolicyConfig {
            extractor: FeaturesExtractorConfig::new(EncoderKind::Small, [36, 36, 3], 16),
            layout: ActionLayout::Categorical(vec![3]),
            lstm_hidden_size: lstm,
            log_std_init: 0.0,
        }
    }

    #[test]
    fn test_observation_layout_is_chw() {
        let obs = Observation::new([1, 2, 2], vec![255, 0, 0, 255]);
        let tensor = observations_to_tensor::<NdArray>(&[&obs], &Default::default());
        assert_eq!(tensor.dims(), [1, 2, 1, 2]);
        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_feed_forward_shapes() {
        let device = Default::default();
        let policy = config(None).init::<NdArray>(&device).unwrap();
        let out = policy.forward(Tensor::zeros([4, 3, 36, 36], &device));
        assert_eq!(out.action_head.dims(), [4, 3]);
        assert_eq!(out.values.dims(), [4]);
        assert!(policy.log_std().is_none());
    }

    #[test]
    fn test_recurrent_sequence_matches_steps() {
        let device = Default::default();
        let policy = config(Some(8)).init::<NdArray>(&device).unwrap();
        let obs = Tensor::<NdArray, 4>::random(
            [3, 3, 36, 36],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let starts = Tensor::<NdArray, 1>::from_data(TensorData::new(vec![1.0f32, 0.0, 1.0], [3]), &device);

        let sequence = policy.forward_sequences(
            obs.clone(),
            RecurrentState::zeros(1, 8, &device),
            starts.clone(),
            1,
            3,
        );

        let mut state = RecurrentState::zeros(1, 8, &device);
        let mut stepped = Vec::new();
        for t in 0..3 {
            let (out, next) = policy.forward_step(
                obs.clone().narrow(0, t, 1),
                state,
                starts.clone().narrow(0, t, 1),
            );
            stepped.extend(out.values.into_data().to_vec::<f32>().unwrap());
            state = next;
        }

        let values = sequence.values.into_data().to_vec::<f32>().unwrap();
        for (a, b) in values.iter().zip(&stepped) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
