// Launch options for the chamber build and their command-line translation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODE: &str = "rest";

/// Options understood by the chamber build.
///
/// Only options that are set become launch arguments; anything left unset
/// takes the simulator's built-in default. Flags count as set when `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    /// Directory the build writes its recordings to.
    pub rec_path: Option<PathBuf>,
    pub recording_frames: Option<u64>,
    pub record_chamber: bool,
    pub record_agent: bool,
    pub random_pos: bool,
    pub rewarded: bool,
    pub episode_steps: Option<u64>,
    pub mode: Option<String>,
}

impl LaunchOptions {
    /// Builds the argument list, always in the same flag order.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.rec_path {
            args.push("--log-dir".to_string());
            args.push(path.display().to_string());
        }
        if let Some(frames) = self.recording_frames {
            args.push("--recording-steps".to_string());
            args.push(frames.to_string());
        }
        let flags = [
            (self.record_chamber, "--record-chamber"),
            (self.record_agent, "--record-agent"),
            (self.random_pos, "--random-pos"),
            (self.rewarded, "--rewarded"),
        ];
        for (set, flag) in flags {
            if set {
                args.push(flag.to_string());
                args.push("true".to_string());
            }
        }
        if let Some(steps) = self.episode_steps {
            args.push("--episode-steps".to_string());
            args.push(steps.to_string());
        }
        if let Some(mode) = &self.mode {
            args.push("--mode".to_string());
            args.push(mode.clone());
        }
        args
    }

    /// The mode the chamber runs in.
    pub fn mode(&self) -> &str {
        self.mode.as_deref().unwrap_or(DEFAULT_MODE)
    }
}
