// Checkpoint management system
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use crate::error::TrainError;

/// A model whose state can be written to disk.
///
/// Paths are given without extension; the recorder adds its own.
pub trait Checkpointable {
    fn save_model(&self, path: &Path) -> Result<(), TrainError>;

    fn save_optimizer(&self, path: &Path) -> Result<(), TrainError>;
}

/// Writes `<prefix>_<step>_steps` snapshots and prunes the oldest ones.
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
    name_prefix: String,
    keep_checkpoints: Option<usize>,
}

pub const CHECKPOINT_EXTENSION: &str = "mpk";

impl CheckpointManager {
    pub fn new(checkpoint_dir: &Path, name_prefix: &str, keep_checkpoints: Option<usize>) -> Result<Self, TrainError> {
        fs::create_dir_all(checkpoint_dir)?;
        Ok(Self {
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            name_prefix: name_prefix.to_string(),
            keep_checkpoints,
        })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn model_path(&self, step: u64) -> PathBuf {
        self.checkpoint_dir.join(format!("{}_{}_steps", self.name_prefix, step))
    }

    pub fn optimizer_path(&self, step: u64) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{}_optimizer_{}_steps", self.name_prefix, step))
    }

    pub fn save_checkpoint(&self, model: &dyn Checkpointable, step: u64) -> Result<(), TrainError> {
        let model_path = self.model_path(step);
        model.save_model(&model_path)?;
        model.save_optimizer(&self.optimizer_path(step))?;
        info!("Checkpoint saved: {}.{}", model_path.display(), CHECKPOINT_EXTENSION);

        if let Some(keep) = self.keep_checkpoints {
            self.cleanup_old_checkpoints(&self.name_prefix, keep)?;
            self.cleanup_old_checkpoints(&format!("{}_optimizer", self.name_prefix), keep)?;
        }
        Ok(())
    }

    /// Saved checkpoint steps for `prefix`, newest first.
    pub fn list_checkpoints(&self, prefix: &str) -> Result<Vec<(u64, PathBuf)>, TrainError> {
        let re = Regex::new(&format!(
            r"^{}_(\d+)_steps\.{}$",
            regex::escape(prefix),
            CHECKPOINT_EXTENSION
        ))
        .map_err(|e| TrainError::Record(e.to_string()))?;

        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&self.checkpoint_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(step) = entry
                .file_name()
                .to_str()
                .and_then(|name| re.captures(name))
                .and_then(|captures| captures.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            {
                checkpoints.push((step, entry.path()));
            }
        }
        checkpoints.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(checkpoints)
    }

    fn cleanup_old_checkpoints(&self, prefix: &str, keep: usize) -> Result<(), TrainError> {
        for (_, old) in self.list_checkpoints(prefix)?.into_iter().skip(keep) {
            fs::remove_file(&old)?;
            debug!("Removed old checkpoint: {}", old.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FileModel;

    impl Checkpointable for FileModel {
        fn save_model(&self, path: &Path) -> Result<(), TrainError> {
            fs::write(path.with_extension(CHECKPOINT_EXTENSION), b"model")?;
            Ok(())
        }

        fn save_optimizer(&self, path: &Path) -> Result<(), TrainError> {
            fs::write(path.with_extension(CHECKPOINT_EXTENSION), b"optim")?;
            Ok(())
        }
    }

    #[test]
    fn test_keeps_newest_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "supervised_model", Some(2)).unwrap();
        for step in [100, 200, 300] {
            manager.save_checkpoint(&FileModel, step).unwrap();
        }
        let steps: Vec<u64> = manager
            .list_checkpoints("supervised_model")
            .unwrap()
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(steps, vec![300, 200]);
        assert!(!dir.path().join("supervised_model_optimizer_100_steps.mpk").exists());
        assert!(dir.path().join("supervised_model_optimizer_300_steps.mpk").exists());
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "supervised_model", None).unwrap();
        for step in [1, 2, 3] {
            manager.save_checkpoint(&FileModel, step).unwrap();
        }
        assert_eq!(manager.list_checkpoints("supervised_model").unwrap().len(), 3);
    }
}
