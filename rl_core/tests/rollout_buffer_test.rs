use chamber_rl::env::Observation;
use chamber_rl::trainers::buffer::{Minibatch, RolloutBuffer, RolloutStep};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() < eps
}

fn push(buf: &mut RolloutBuffer, reward: f32, value: f32, episode_start: bool) {
    buf.add(RolloutStep {
        observations: &[Observation::zeros([1, 1, 1])],
        actions: &[vec![0.0]],
        rewards: &[reward],
        episode_starts: &[episode_start],
        values: &[value],
        log_probs: &[0.0],
        lstm_state: None,
    });
}

#[test]
fn test_gae_and_returns() {
    // rewards: [1,1,1], values: [0.5,0.5,0.5], the third step starts a new episode
    // and the step after the buffer ends one
    let mut buf = RolloutBuffer::new(3, 1, 1, 0);
    push(&mut buf, 1.0, 0.5, false);
    push(&mut buf, 1.0, 0.5, false);
    push(&mut buf, 1.0, 0.5, true);
    assert!(buf.is_full());

    buf.compute_returns_and_advantage(&[0.0], &[true], 0.99, 0.95);

    assert!(approx_eq(buf.advantages[2], 0.5, 1e-5));
    assert!(approx_eq(buf.advantages[1], 0.5, 1e-5));
    assert!(approx_eq(buf.advantages[0], 1.46525, 1e-4));

    assert!(approx_eq(buf.returns[2], 1.0, 1e-5));
    assert!(approx_eq(buf.returns[1], 1.0, 1e-5));
    assert!(approx_eq(buf.returns[0], 1.96525, 1e-4));
}

#[test]
fn test_bootstrap_from_last_value() {
    let mut buf = RolloutBuffer::new(1, 1, 1, 0);
    push(&mut buf, 0.0, 0.0, false);
    buf.compute_returns_and_advantage(&[2.0], &[false], 0.5, 1.0);
    assert!(approx_eq(buf.advantages[0], 1.0, 1e-6));
}

#[test]
fn test_minibatches_cover_every_step() {
    let mut buf = RolloutBuffer::new(6, 1, 1, 0);
    for _ in 0..6 {
        push(&mut buf, 0.0, 0.0, false);
    }
    let mut rng = StdRng::seed_from_u64(1);

    let mut shuffled: Vec<usize> = buf
        .shuffled_minibatches(4, &mut rng)
        .iter()
        .flat_map(|mb| mb.indices().to_vec())
        .collect();
    shuffled.sort_unstable();
    assert_eq!(shuffled, (0..6).collect::<Vec<_>>());

    let sequences = buf.sequence_minibatches(4, &mut rng);
    assert_eq!(sequences.len(), 2);
    for mb in &sequences {
        let Minibatch::Sequences { start, len, indices } = mb else {
            panic!("expected sequence minibatches");
        };
        assert_eq!(indices, &(*start..*start + *len).collect::<Vec<_>>());
    }
}
