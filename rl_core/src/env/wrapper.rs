// Chamber environment adapter - launch argument translation, port allocation and
// the environment log side channel around a simulation session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::env::launch::LaunchOptions;
use crate::env::port::find_free_port;
use crate::env::session::SimulationSession;
use crate::env::spaces::{Action, ActionSpace, Observation, ObservationSpace, ResetOptions, StepResult};
use crate::env::unity_env::{UnityEnvironment, UnityLaunch};
use crate::error::EnvError;
use crate::side_channel::{EngineConfig, LogChannel, SideChannel};

/// Connection settings for a Unity session that are not chamber launch options.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub seed: i32,
    pub timeout_wait: Duration,
    pub no_graphics: bool,
    pub engine_config: Option<EngineConfig>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            timeout_wait: Duration::from_secs(60),
            no_graphics: false,
            engine_config: None,
        }
    }
}

/// Presents a simulation session as a reset/step/close environment and owns
/// the session's log channel.
///
/// The wrapper has no notion of episode budgets; concrete environments such as
/// [`ChamberEnv`](crate::env::ChamberEnv) add that.
pub struct ChamberEnvWrapper<S: SimulationSession = UnityEnvironment> {
    session: Option<S>,
    log_channel: Option<Arc<LogChannel>>,
    mode: String,
    port: u16,
    launch_args: Vec<String>,
}

impl ChamberEnvWrapper<UnityEnvironment> {
    /// Starts the chamber build at `env_path` and connects to it.
    ///
    /// With no `env_path` the session waits for a Unity Editor instead.
    pub fn launch(
        run_id: &str,
        env_path: Option<&Path>,
        base_port: u16,
        options: &LaunchOptions,
        log_dir: &Path,
        session: SessionOptions,
    ) -> Result<Self, EnvError> {
        let env_path: Option<PathBuf> = env_path.map(Path::to_path_buf);
        Self::launch_with(run_id, base_port, options, log_dir, |port, args, log_channel| {
            let launch = UnityLaunch {
                env_path,
                port,
                additional_args: args,
                seed: session.seed,
                no_graphics: session.no_graphics,
                timeout_wait: session.timeout_wait,
                engine_config: session.engine_config,
            };
            let channels: Vec<Arc<dyn SideChannel>> = vec![log_channel];
            UnityEnvironment::launch(launch, channels)
        })
    }
}

impl<S: SimulationSession> ChamberEnvWrapper<S> {
    /// Builds the adapter around a session produced by `connect`.
    ///
    /// `connect` receives the resolved port, the translated launch arguments
    /// and the log channel, which it must attach before returning.
    pub fn launch_with<F>(
        run_id: &str,
        base_port: u16,
        options: &LaunchOptions,
        log_dir: &Path,
        connect: F,
    ) -> Result<Self, EnvError>
    where
        F: FnOnce(u16, Vec<String>, Arc<LogChannel>) -> Result<S, EnvError>,
    {
        let launch_args = options.to_args();
        let port = find_free_port(base_port)?;
        if port != base_port {
            info!("Port {} is in use, using {}", base_port, port);
        }

        let log_channel = Arc::new(LogChannel::create(run_id, log_dir)?);
        let session = connect(port, launch_args.clone(), Arc::clone(&log_channel))?;

        Ok(Self {
            session: Some(session),
            log_channel: Some(log_channel),
            mode: options.mode().to_string(),
            port,
            launch_args,
        })
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn launch_args(&self) -> &[String] {
        &self.launch_args
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    fn session(&self) -> Result<&S, EnvError> {
        self.session.as_ref().ok_or(EnvError::Closed)
    }

    fn session_mut(&mut self) -> Result<&mut S, EnvError> {
        self.session.as_mut().ok_or(EnvError::Closed)
    }

    pub fn observation_space(&self) -> Result<&ObservationSpace, EnvError> {
        Ok(self.session()?.observation_space())
    }

    pub fn action_space(&self) -> Result<&ActionSpace, EnvError> {
        Ok(self.session()?.action_space())
    }

    pub fn step(&mut self, action: &Action) -> Result<StepResult, EnvError> {
        let step = self.session_mut()?.step(action)?;
        Ok(StepResult {
            observation: step.observation,
            reward: step.reward.as_f32(),
            done: step.done,
            info: step.info,
        })
    }

    pub fn reset(&mut self, options: &ResetOptions) -> Result<Observation, EnvError> {
        self.session_mut()?.reset(options)
    }

    /// Sends `msg` to the simulator over the log channel.
    pub fn log(&self, msg: &str) -> Result<(), EnvError> {
        self.log_channel()?.log_str(msg)
    }

    /// The log channel attached to the session.
    pub fn log_channel(&self) -> Result<&Arc<LogChannel>, EnvError> {
        self.log_channel.as_ref().ok_or(EnvError::Closed)
    }

    /// Shuts the session down and releases the log channel.
    ///
    /// Fails with [`EnvError::Closed`] when called a second time.
    pub fn close(&mut self) -> Result<(), EnvError> {
        let mut session = self.session.take().ok_or(EnvError::Closed)?;
        let result = session.close();
        self.log_channel = None;
        result
    }
}

impl<S: SimulationSession> Drop for ChamberEnvWrapper<S> {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.close() {
                warn!("Failed to close chamber environment: {}", e);
            }
        }
    }
}
