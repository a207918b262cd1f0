// Metrics logger - collects key/value pairs during an iteration and dumps them
// to every configured sink.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{ConfigError, TrainError};
use crate::trainers::tensorboard::TensorBoardWriter;

pub type Metrics = BTreeMap<String, f64>;

pub trait StatsWriter: Send {
    fn write(&mut self, metrics: &Metrics, step: u64) -> Result<(), TrainError>;

    fn write_hparams(&mut self, _hparams: &serde_json::Value, _metrics: &Metrics) -> Result<(), TrainError> {
        Ok(())
    }
}

/// Collects metrics and writes them to its sinks on [`MetricsLogger::dump`].
pub struct MetricsLogger {
    folder: PathBuf,
    values: Metrics,
    writers: Vec<Box<dyn StatsWriter>>,
}

impl MetricsLogger {
    pub fn new(folder: &Path) -> Self {
        Self {
            folder: folder.to_path_buf(),
            values: Metrics::new(),
            writers: Vec::new(),
        }
    }

    /// Builds a logger with the named sinks.
    ///
    /// Known formats: `stdout`, `csv` (`progress.csv`), `json` (`metrics.jsonl`)
    /// and `tensorboard` (per-tag scalars under `tensorboard/<run_name>_<k>`).
    pub fn configure(folder: &Path, formats: &[&str], run_name: &str) -> Result<Self, TrainError> {
        fs::create_dir_all(folder)?;
        let mut logger = Self::new(folder);
        for format in formats {
            let writer: Box<dyn StatsWriter> = match *format {
                "stdout" => Box::new(ConsoleWriter),
                "csv" => Box::new(CsvWriter::new(folder.join("progress.csv"))),
                "json" => Box::new(JsonWriter::new(folder.join("metrics.jsonl"))),
                "tensorboard" => Box::new(TensorBoardWriter::create(&folder.join("tensorboard"), run_name)?),
                other => {
                    return Err(ConfigError::Invalid(format!("unknown log format '{}'", other)).into())
                }
            };
            logger.add_writer(writer);
        }
        Ok(logger)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn add_writer(&mut self, writer: Box<dyn StatsWriter>) {
        self.writers.push(writer);
    }

    pub fn record(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Writes the recorded values to every sink and clears them.
    pub fn dump(&mut self, step: u64) -> Result<(), TrainError> {
        if self.values.is_empty() {
            return Ok(());
        }
        for writer in &mut self.writers {
            writer.write(&self.values, step)?;
        }
        self.values.clear();
        Ok(())
    }

    pub fn record_hparams(&mut self, hparams: &serde_json::Value, metrics: &Metrics) -> Result<(), TrainError> {
        for writer in &mut self.writers {
            writer.write_hparams(hparams, metrics)?;
        }
        Ok(())
    }
}

/// Prints a key/value table through tracing.
pub struct ConsoleWriter;

impl StatsWriter for ConsoleWriter {
    fn write(&mut self, metrics: &Metrics, _step: u64) -> Result<(), TrainError> {
        let width = metrics.keys().map(String::len).max().unwrap_or(0);
        let mut table = String::new();
        for (key, value) in metrics {
            table.push_str(&format!("\n| {:<width$} | {:>12} |", key, format_value(*value), width = width));
        }
        info!("{}", table);
        Ok(())
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e12 {
        format!("{}", value as i64)
    } else if value.abs() >= 1e4 || (value != 0.0 && value.abs() < 1e-3) {
        format!("{:.3e}", value)
    } else {
        format!("{:.4}", value)
    }
}

/// `progress.csv`: one row per dump. New keys rewrite the file with a wider header.
pub struct CsvWriter {
    path: PathBuf,
    keys: Vec<String>,
}

impl CsvWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path, keys: Vec::new() }
    }

    fn rewrite_with_keys(&mut self, keys: Vec<String>) -> Result<(), TrainError> {
        let mut rows: Vec<Vec<String>> = Vec::new();
        if self.path.exists() {
            let reader = BufReader::new(File::open(&self.path)?);
            for line in reader.lines().skip(1) {
                let line = line?;
                let old: Vec<&str> = line.split(',').collect();
                let row = keys
                    .iter()
                    .map(|k| {
                        self.keys
                            .iter()
                            .position(|old_key| old_key == k)
                            .and_then(|i| old.get(i))
                            .map(|v| v.to_string())
                            .unwrap_or_default()
                    })
                    .collect();
                rows.push(row);
            }
        }
        let mut file = File::create(&self.path)?;
        writeln!(file, "{}", keys.join(","))?;
        for row in rows {
            writeln!(file, "{}", row.join(","))?;
        }
        self.keys = keys;
        Ok(())
    }
}

impl StatsWriter for CsvWriter {
    fn write(&mut self, metrics: &Metrics, _step: u64) -> Result<(), TrainError> {
        let new_keys: Vec<&String> = metrics.keys().filter(|k| !self.keys.contains(k)).collect();
        if !new_keys.is_empty() || !self.path.exists() {
            let mut keys = self.keys.clone();
            keys.extend(new_keys.into_iter().cloned());
            self.rewrite_with_keys(keys)?;
        }
        let row: Vec<String> = self
            .keys
            .iter()
            .map(|k| metrics.get(k).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", row.join(","))?;
        Ok(())
    }
}

/// `metrics.jsonl`: one JSON object per dump.
pub struct JsonWriter {
    path: PathBuf,
}

impl JsonWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StatsWriter for JsonWriter {
    fn write(&mut self, metrics: &Metrics, step: u64) -> Result<(), TrainError> {
        let mut object = serde_json::Map::new();
        object.insert("step".into(), serde_json::json!(step));
        for (key, value) in metrics {
            object.insert(key.clone(), serde_json::json!(value));
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::Value::Object(object))?;
        Ok(())
    }
}
