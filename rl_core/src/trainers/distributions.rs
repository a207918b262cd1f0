// Action distributions - categorical branches for discrete spaces, a diagonal
// Gaussian with state-independent log-std for continuous ones.

use std::f32::consts::PI;

use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;

use crate::env::spaces::ActionSpace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionLayout {
    /// One categorical per branch, sized by its number of choices.
    Categorical(Vec<usize>),
    Gaussian(usize),
}

impl ActionLayout {
    pub fn from_space(space: &ActionSpace) -> Self {
        match space {
            ActionSpace::Discrete(branches) => ActionLayout::Categorical(branches.clone()),
            ActionSpace::Continuous(dim) => ActionLayout::Gaussian(*dim),
        }
    }

    /// Width of the action head's output.
    pub fn logits_dim(&self) -> usize {
        match self {
            ActionLayout::Categorical(branches) => branches.iter().sum(),
            ActionLayout::Gaussian(dim) => *dim,
        }
    }

    /// Columns an action occupies in the rollout buffer.
    pub fn action_dim(&self) -> usize {
        match self {
            ActionLayout::Categorical(branches) => branches.len(),
            ActionLayout::Gaussian(dim) => *dim,
        }
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, ActionLayout::Gaussian(_))
    }

    /// Log-likelihood of `actions` (`[batch, action_dim]`) under the head output.
    pub fn log_prob<B: Backend>(
        &self,
        head: Tensor<B, 2>,
        log_std: Option<Tensor<B, 1>>,
        actions: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [batch, _] = head.dims();
        match self {
            ActionLayout::Categorical(branches) => {
                let mut offset = 0;
                let mut total: Option<Tensor<B, 2>> = None;
                for (i, &n) in branches.iter().enumerate() {
                    let log_probs = log_softmax(head.clone().narrow(1, offset, n), 1);
                    let index = actions.clone().narrow(1, i, 1).int();
                    let picked = log_probs.gather(1, index);
                    total = Some(match total {
                        Some(sum) => sum + picked,
                        None => picked,
                    });
                    offset += n;
                }
                match total {
                    Some(sum) => sum.reshape([batch]),
                    None => Tensor::zeros([batch], &head.device()),
                }
            }
            ActionLayout::Gaussian(dim) => {
                let log_std = expand_log_std(log_std, batch, *dim, &head.device());
                let std = log_std.clone().exp();
                let z = (actions - head) / std;
                let per_dim = z.powf_scalar(2.0).mul_scalar(-0.5) - log_std - 0.5 * (2.0 * PI).ln();
                per_dim.sum_dim(1).reshape([batch])
            }
        }
    }

    /// Entropy per sample.
    pub fn entropy<B: Backend>(&self, head: Tensor<B, 2>, log_std: Option<Tensor<B, 1>>) -> Tensor<B, 1> {
        let [batch, _] = head.dims();
        match self {
            ActionLayout::Categorical(branches) => {
                let mut offset = 0;
                let mut total: Option<Tensor<B, 2>> = None;
                for &n in branches {
                    let log_probs = log_softmax(head.clone().narrow(1, offset, n), 1);
                    let branch = (log_probs.clone().exp() * log_probs).sum_dim(1).neg();
                    total = Some(match total {
                        Some(sum) => sum + branch,
                        None => branch,
                    });
                    offset += n;
                }
                match total {
                    Some(sum) => sum.reshape([batch]),
                    None => Tensor::zeros([batch], &head.device()),
                }
            }
            ActionLayout::Gaussian(dim) => {
                let log_std = expand_log_std(log_std, batch, *dim, &head.device());
                (log_std + 0.5 + 0.5 * (2.0 * PI).ln()).sum_dim(1).reshape([batch])
            }
        }
    }

    /// Draws an action from one row of head output, returning it with its log-probability.
    ///
    /// With `deterministic` the mode is returned instead.
    pub fn sample(&self, head: &[f32], log_std: &[f32], deterministic: bool, rng: &mut impl Rng) -> (Vec<f32>, f32) {
        match self {
            ActionLayout::Categorical(branches) => {
                let mut action = Vec::with_capacity(branches.len());
                let mut log_prob = 0.0;
                let mut offset = 0;
                for &n in branches {
                    let log_probs = log_softmax_host(&head[offset..offset + n]);
                    let choice = if deterministic {
                        argmax(&log_probs)
                    } else {
                        sample_categorical(&log_probs, rng)
                    };
                    action.push(choice as f32);
                    log_prob += log_probs[choice];
                    offset += n;
                }
                (action, log_prob)
            }
            ActionLayout::Gaussian(dim) => {
                let mut action = Vec::with_capacity(*dim);
                let mut log_prob = 0.0;
                for i in 0..*dim {
                    let std = log_std[i].exp();
                    let noise = if deterministic { 0.0 } else { standard_normal(rng) };
                    action.push(head[i] + std * noise);
                    log_prob += -0.5 * noise * noise - log_std[i] - 0.5 * (2.0 * PI).ln();
                }
                (action, log_prob)
            }
        }
    }
}

fn expand_log_std<B: Backend>(
    log_std: Option<Tensor<B, 1>>,
    batch: usize,
    dim: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    match log_std {
        Some(log_std) => log_std.reshape([1, dim]).repeat_dim(0, batch),
        None => Tensor::zeros([batch, dim], device),
    }
}

fn log_softmax_host(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|&l| (l - max).exp()).sum::<f32>().ln() + max;
    logits.iter().map(|&l| l - log_sum).collect()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

fn sample_categorical(log_probs: &[f32], rng: &mut impl Rng) -> usize {
    let u: f32 = rng.gen();
    let mut cumulative = 0.0;
    for (i, &lp) in log_probs.iter().enumerate() {
        cumulative += lp.exp();
        if u < cumulative {
            return i;
        }
    }
    log_probs.len().saturating_sub(1)
}

// Box-Muller
fn standard_normal(rng: &mut impl Rng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tensor2(values: Vec<f32>, shape: [usize; 2]) -> Tensor<NdArray, 2> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_uniform_categorical() {
        let layout = ActionLayout::Categorical(vec![4]);
        let head = tensor2(vec![0.0; 4], [1, 4]);
        let actions = tensor2(vec![2.0], [1, 1]);
        let log_prob: f32 = layout.log_prob(head.clone(), None, actions).into_scalar();
        assert!((log_prob - (0.25f32).ln()).abs() < 1e-5);
        let entropy: f32 = layout.entropy(head, None).into_scalar();
        assert!((entropy - (4.0f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_host_and_tensor_log_probs_agree() {
        let mut rng = StdRng::seed_from_u64(7);
        let layout = ActionLayout::Categorical(vec![3, 2]);
        let logits = vec![0.5, -1.0, 2.0, 0.1, 0.3];
        let (action, host_log_prob) = layout.sample(&logits, &[], false, &mut rng);
        let tensor_log_prob: f32 = layout
            .log_prob(tensor2(logits, [1, 5]), None, tensor2(action, [1, 2]))
            .into_scalar();
        assert!((host_log_prob - tensor_log_prob).abs() < 1e-5);
    }

    #[test]
    fn test_gaussian_mode_and_log_prob() {
        let mut rng = StdRng::seed_from_u64(7);
        let layout = ActionLayout::Gaussian(2);
        let (action, log_prob) = layout.sample(&[0.25, -0.5], &[0.0, 0.0], true, &mut rng);
        assert_eq!(action, vec![0.25, -0.5]);
        let expected = -(2.0 * PI).ln();
        assert!((log_prob - expected).abs() < 1e-5);

        let log_std = Tensor::<NdArray, 1>::from_data(TensorData::new(vec![0.0f32, 0.0], [2]), &Default::default());
        let tensor_log_prob: f32 = layout
            .log_prob(tensor2(vec![0.25, -0.5], [1, 2]), Some(log_std), tensor2(action, [1, 2]))
            .into_scalar();
        assert!((tensor_log_prob - expected).abs() < 1e-5);
    }
}
