// TensorBoard-style scalar logging - one CSV per tag inside a numbered run directory.
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::TrainError;
use crate::trainers::stats::{Metrics, StatsWriter};

pub struct TensorBoardWriter {
    log_dir: PathBuf,
    run_name: String,
}

impl TensorBoardWriter {
    /// Creates `<root>/<run_name>_<k>`, with `k` one past the highest existing run.
    pub fn create(root: &Path, run_name: &str) -> Result<Self, TrainError> {
        fs::create_dir_all(root)?;
        let run_id = latest_run_id(root, run_name)? + 1;
        let log_dir = root.join(format!("{}_{}", run_name, run_id));
        fs::create_dir_all(&log_dir)?;
        debug!("TensorBoard scalars under {}", log_dir.display());

        Ok(Self {
            log_dir,
            run_name: run_name.to_string(),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn add_scalar(&self, tag: &str, value: f64, step: u64) -> Result<(), TrainError> {
        let file_path = self.log_dir.join(format!("{}.csv", tag.replace('/', "_")));

        let file_exists = file_path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&file_path)?;

        if !file_exists {
            writeln!(file, "step,value")?;
        }

        writeln!(file, "{},{}", step, value)?;
        Ok(())
    }

    pub fn log_hyperparams(&self, hparams: &serde_json::Value, metrics: &Metrics) -> Result<(), TrainError> {
        let hparams_path = self.log_dir.join("hparams.json");
        let contents = serde_json::json!({
            "hparams": hparams,
            "metrics": metrics,
        });
        fs::write(hparams_path, serde_json::to_string_pretty(&contents)?)?;
        Ok(())
    }
}

impl StatsWriter for TensorBoardWriter {
    fn write(&mut self, metrics: &Metrics, step: u64) -> Result<(), TrainError> {
        for (tag, value) in metrics {
            self.add_scalar(tag, *value, step)?;
        }
        Ok(())
    }

    fn write_hparams(&mut self, hparams: &serde_json::Value, metrics: &Metrics) -> Result<(), TrainError> {
        self.log_hyperparams(hparams, metrics)
    }
}

/// Highest `k` among `<root>/<run_name>_<k>` directories, 0 if none.
fn latest_run_id(root: &Path, run_name: &str) -> Result<u32, TrainError> {
    let re = Regex::new(&format!(r"^{}_(\d+)$", regex::escape(run_name)))
        .map_err(|e| TrainError::Tensor(e.to_string()))?;
    let mut latest = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| re.captures(name))
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            latest = latest.max(id);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensorboard_writer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TensorBoardWriter::create(dir.path(), "agent").unwrap();
        assert!(writer.log_dir().ends_with("agent_1"));
        writer.add_scalar("train/loss", 0.5, 100).unwrap();
        writer.add_scalar("train/loss", 0.25, 200).unwrap();

        let contents = fs::read_to_string(writer.log_dir().join("train_loss.csv")).unwrap();
        assert_eq!(contents, "step,value\n100,0.5\n200,0.25\n");
    }

    #[test]
    fn test_run_directories_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("agent_3")).unwrap();
        fs::create_dir_all(dir.path().join("other_9")).unwrap();
        let writer = TensorBoardWriter::create(dir.path(), "agent").unwrap();
        assert!(writer.log_dir().ends_with("agent_4"));
    }
}
