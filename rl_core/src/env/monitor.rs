// Episode monitor - records reward, length and wall time of every finished
// episode to monitor.csv.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::env::spaces::{Action, ActionSpace, EpisodeStats, Observation, ObservationSpace, ResetOptions, StepResult};
use crate::env::Environment;
use crate::error::EnvError;

pub const MONITOR_FILE: &str = "monitor.csv";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MonitorHeader {
    t_start: f64,
    env_id: String,
}

/// Wraps an environment and logs one CSV row per finished episode.
pub struct Monitor<E: Environment> {
    env: E,
    path: PathBuf,
    writer: BufWriter<File>,
    started: Instant,
    rewards: Vec<f32>,
    needs_reset: bool,
    episode_rewards: Vec<f32>,
    episode_lengths: Vec<u64>,
    episode_times: Vec<f64>,
    total_steps: u64,
}

impl<E: Environment> Monitor<E> {
    /// Creates `<dir>/monitor.csv`, truncating any previous log.
    pub fn new(env: E, dir: &Path, env_id: Option<&str>) -> Result<Self, EnvError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(MONITOR_FILE);
        let mut writer = BufWriter::new(File::create(&path)?);

        let t_start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let header = MonitorHeader {
            t_start,
            env_id: env_id.unwrap_or("None").to_string(),
        };
        let header = serde_json::to_string(&header)
            .map_err(|e| EnvError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        writeln!(writer, "#{}", header)?;
        writeln!(writer, "r,l,t")?;
        writer.flush()?;

        Ok(Self {
            env,
            path,
            writer,
            started: Instant::now(),
            rewards: Vec::new(),
            needs_reset: true,
            episode_rewards: Vec::new(),
            episode_lengths: Vec::new(),
            episode_times: Vec::new(),
            total_steps: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn episode_rewards(&self) -> &[f32] {
        &self.episode_rewards
    }

    pub fn episode_lengths(&self) -> &[u64] {
        &self.episode_lengths
    }

    pub fn episode_times(&self) -> &[f64] {
        &self.episode_times
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn get_wrapper(&self) -> &E {
        &self.env
    }

    pub fn into_inner(mut self) -> Result<E, EnvError> {
        self.writer.flush()?;
        Ok(self.env)
    }

    fn finish_episode(&mut self) -> Result<EpisodeStats, EnvError> {
        let reward: f32 = self.rewards.iter().sum();
        let length = self.rewards.len() as u64;
        let elapsed = self.started.elapsed().as_secs_f64();

        writeln!(self.writer, "{},{},{}", round6(reward as f64), length, round6(elapsed))?;
        self.writer.flush()?;
        debug!("Episode finished: reward {:.3}, length {}", reward, length);

        self.episode_rewards.push(reward);
        self.episode_lengths.push(length);
        self.episode_times.push(elapsed);
        Ok(EpisodeStats {
            reward,
            length,
            elapsed,
        })
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

impl<E: Environment> Environment for Monitor<E> {
    fn observation_space(&self) -> &ObservationSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> &ActionSpace {
        self.env.action_space()
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<Observation, EnvError> {
        self.rewards.clear();
        self.needs_reset = false;
        self.env.reset(options)
    }

    fn step(&mut self, action: &Action) -> Result<StepResult, EnvError> {
        if self.needs_reset {
            return Err(EnvError::Protocol(
                "tried to step an environment that needs reset".into(),
            ));
        }
        let mut result = self.env.step(action)?;
        self.rewards.push(result.reward);
        self.total_steps += 1;
        if result.done {
            self.needs_reset = true;
            result.info.episode = Some(self.finish_episode()?);
        }
        Ok(result)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.writer.flush()?;
        self.env.close()
    }

    fn steps_from_episodes(&self, episodes: u64) -> Result<u64, EnvError> {
        self.env.steps_from_episodes(episodes)
    }
}

/// Contents of a monitor log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorResults {
    pub t_start: f64,
    pub env_id: String,
    pub rewards: Vec<f32>,
    pub lengths: Vec<u64>,
    pub times: Vec<f64>,
}

impl MonitorResults {
    /// Cumulative environment steps at the end of each episode.
    pub fn cumulative_steps(&self) -> Vec<u64> {
        self.lengths
            .iter()
            .scan(0u64, |total, &l| {
                *total += l;
                Some(*total)
            })
            .collect()
    }

    /// Mean reward over the last `n` episodes, if there are any.
    pub fn mean_last(&self, n: usize) -> Option<f32> {
        if self.rewards.is_empty() {
            return None;
        }
        let tail = &self.rewards[self.rewards.len().saturating_sub(n)..];
        Some(tail.iter().sum::<f32>() / tail.len() as f32)
    }
}

/// Reads `<dir>/monitor.csv` back.
pub fn load_results(dir: &Path) -> Result<MonitorResults, EnvError> {
    let path = dir.join(MONITOR_FILE);
    let reader = BufReader::new(File::open(&path)?);
    let mut results = MonitorResults::default();
    let bad = |line: &str| EnvError::Protocol(format!("malformed monitor line in {}: {}", path.display(), line));

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(header) = line.strip_prefix('#') {
            let header: MonitorHeader = serde_json::from_str(header).map_err(|_| bad(&line))?;
            results.t_start = header.t_start;
            results.env_id = header.env_id;
            continue;
        }
        if line.trim().is_empty() || (i <= 1 && line.starts_with("r,")) {
            continue;
        }
        let mut fields = line.split(',');
        let (Some(r), Some(l), Some(t)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(bad(&line));
        };
        results.rewards.push(r.trim().parse().map_err(|_| bad(&line))?);
        results.lengths.push(l.trim().parse().map_err(|_| bad(&line))?);
        results.times.push(t.trim().parse().map_err(|_| bad(&line))?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_last_uses_tail() {
        let results = MonitorResults {
            rewards: vec![0.0, 1.0, 2.0, 3.0],
            lengths: vec![1, 2, 3, 4],
            ..Default::default()
        };
        assert_eq!(results.mean_last(2), Some(2.5));
        assert_eq!(results.mean_last(100), Some(1.5));
        assert_eq!(results.cumulative_steps(), vec![1, 3, 6, 10]);
        assert_eq!(MonitorResults::default().mean_last(100), None);
    }
}
