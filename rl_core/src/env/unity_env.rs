// Unity environment - a process-backed simulation session over the gRPC communicator.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::communicator_objects::observation_proto::ObservationData;
use crate::communicator_objects::unity_rl_input_proto::ListAgentActionProto;
use crate::communicator_objects::{
    ActionSpecProto, AgentActionProto, AgentInfoProto, CompressionTypeProto, ObservationProto,
    UnityOutputProto,
};
use crate::env::session::SimulationSession;
use crate::env::spaces::{
    Action, ActionSpace, Observation, ObservationSpace, RawReward, ResetOptions, SessionStep, StepInfo,
};
use crate::error::EnvError;
use crate::grpc_server::{GrpcServer, InitConfig};
use crate::side_channel::{
    collect_outgoing, process_incoming, serialize_engine_config, serialize_environment_parameters,
    EngineConfig, SideChannel,
};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const PROCESS_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to start and connect to a simulator.
#[derive(Debug, Clone)]
pub struct UnityLaunch {
    /// Path to the build; `None` waits for a Unity Editor to connect instead.
    pub env_path: Option<PathBuf>,
    pub port: u16,
    pub additional_args: Vec<String>,
    pub seed: i32,
    pub no_graphics: bool,
    pub timeout_wait: Duration,
    pub engine_config: Option<EngineConfig>,
}

impl UnityLaunch {
    pub fn new(env_path: Option<PathBuf>, port: u16, additional_args: Vec<String>) -> Self {
        Self {
            env_path,
            port,
            additional_args,
            seed: 0,
            no_graphics: false,
            timeout_wait: Duration::from_secs(60),
            engine_config: None,
        }
    }
}

/// A single-agent view of a Unity build.
pub struct UnityEnvironment {
    runtime: Runtime,
    server: GrpcServer,
    process: Option<Child>,
    side_channels: Vec<Arc<dyn SideChannel>>,
    behavior_name: String,
    action_spec: ActionSpecProto,
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    agent_id: Option<i32>,
    pending_engine_config: Vec<u8>,
    closed: bool,
}

impl UnityEnvironment {
    pub fn launch(
        launch: UnityLaunch,
        side_channels: Vec<Arc<dyn SideChannel>>,
    ) -> Result<Self, EnvError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        // Server first: Unity connects to us
        let mut server = {
            let _guard = runtime.enter();
            GrpcServer::bind(launch.port, launch.timeout_wait)?
        };

        let mut process = match &launch.env_path {
            Some(path) => Some(spawn_executable(path, &launch)?),
            None => {
                info!("Listening on port {}. Start training by pressing Play in the Unity Editor.", launch.port);
                None
            }
        };

        let mut reset_side_channel = launch
            .engine_config
            .as_ref()
            .map(serialize_engine_config)
            .unwrap_or_default();
        reset_side_channel.extend(collect_outgoing(&side_channels));

        let init_config = InitConfig {
            seed: launch.seed,
            ..Default::default()
        };
        let handshake = match runtime.block_on(server.initialize(&init_config, reset_side_channel)) {
            Ok(handshake) => handshake,
            Err(e) => {
                server.close();
                if let Some(child) = process.as_mut() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(e);
            }
        };

        let brain = handshake
            .init_output
            .brain_parameters
            .first()
            .cloned()
            .ok_or_else(|| EnvError::Protocol("Unity reported no behaviors".into()))?;
        if handshake.init_output.brain_parameters.len() > 1 {
            warn!(
                "Unity reported {} behaviors, only '{}' is used",
                handshake.init_output.brain_parameters.len(),
                brain.brain_name
            );
        }
        let action_spec = brain.action_spec.clone().unwrap_or_default();
        let action_space = action_space_from_spec(&action_spec)?;

        process_incoming(&side_channel_of(&handshake.first_output), &side_channels)?;
        let first = agent_infos(&handshake.first_output, &brain.brain_name);
        let first_info = first
            .last()
            .ok_or_else(|| EnvError::Protocol("no agent info after the initial reset".into()))?;
        let visual = first_visual_observation(first_info)?;
        let observation_space = ObservationSpace {
            shape: visual.shape.iter().map(|&d| d.max(0) as usize).collect(),
        };

        info!(
            "Behavior '{}': observation {:?}, actions {:?}",
            brain.brain_name, observation_space.shape, action_space
        );

        Ok(Self {
            runtime,
            server,
            process,
            side_channels,
            behavior_name: brain.brain_name,
            action_spec,
            observation_space,
            action_space,
            agent_id: Some(first_info.id),
            pending_engine_config: Vec::new(),
            closed: false,
        })
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn behavior_name(&self) -> &str {
        &self.behavior_name
    }

    /// Queues an engine configuration to be sent with the next exchange.
    pub fn set_engine_config(&mut self, config: &EngineConfig) {
        self.pending_engine_config = serialize_engine_config(config);
    }

    fn outgoing_side_channel(&mut self, extra: Vec<u8>) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.pending_engine_config);
        data.extend(extra);
        data.extend(collect_outgoing(&self.side_channels));
        data
    }

    fn ensure_open(&self) -> Result<(), EnvError> {
        if self.closed {
            Err(EnvError::Closed)
        } else {
            Ok(())
        }
    }

    fn agent_action(&self, action: &Action) -> Result<AgentActionProto, EnvError> {
        self.action_space.validate(action)?;
        let mut proto = AgentActionProto::default();
        match action {
            Action::Discrete(values) => {
                proto.discrete_actions = values.iter().map(|&v| v as i32).collect();
            }
            Action::Continuous(values) => {
                proto.continuous_actions = values.iter().map(|v| v.clamp(-1.0, 1.0)).collect();
            }
        }
        if proto.continuous_actions.len() != self.action_spec.num_continuous_actions.max(0) as usize {
            proto
                .continuous_actions
                .resize(self.action_spec.num_continuous_actions.max(0) as usize, 0.0);
        }
        Ok(proto)
    }

    fn parse_step(&mut self, output: &UnityOutputProto) -> Result<SessionStep, EnvError> {
        process_incoming(&side_channel_of(output), &self.side_channels)?;
        let step = step_from_output(output, &self.behavior_name, self.agent_id)?;
        self.agent_id = step.info.agent_id;
        Ok(step)
    }
}

/// Picks the agent info that answers a step for `behavior` and decodes it.
pub(crate) fn step_from_output(
    output: &UnityOutputProto,
    behavior: &str,
    agent_id: Option<i32>,
) -> Result<SessionStep, EnvError> {
    let infos = agent_infos(output, behavior);
    if infos.is_empty() {
        return Err(EnvError::Protocol(format!(
            "no agent requested a decision for behavior '{}'",
            behavior
        )));
    }

    // A terminal info takes priority over the decision request that may follow it
    let info = infos
        .iter()
        .find(|info| info.done && Some(info.id) == agent_id)
        .or_else(|| infos.iter().find(|info| info.done))
        .or_else(|| infos.last())
        .ok_or_else(|| EnvError::Protocol("empty agent info list".into()))?;

    let visual = first_visual_observation(info)?;
    let observation = decode_observation(visual)?;

    Ok(SessionStep {
        observation,
        reward: RawReward::Float(info.reward),
        done: info.done,
        info: StepInfo {
            agent_id: Some(info.id),
            interrupted: info.max_step_reached,
            episode: None,
        },
    })
}

impl SimulationSession for UnityEnvironment {
    fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<Observation, EnvError> {
        self.ensure_open()?;
        if options.seed.is_some() {
            debug!("Seed is fixed at launch for Unity builds, ignoring reset seed");
        }
        let side_channel =
            self.outgoing_side_channel(serialize_environment_parameters(&options.environment_parameters));
        let output = self.runtime.block_on(self.server.reset(side_channel))?;
        Ok(self.parse_step(&output)?.observation)
    }

    fn step(&mut self, action: &Action) -> Result<SessionStep, EnvError> {
        self.ensure_open()?;
        let proto = self.agent_action(action)?;
        let mut actions = HashMap::new();
        actions.insert(
            self.behavior_name.clone(),
            ListAgentActionProto { value: vec![proto] },
        );
        let side_channel = self.outgoing_side_channel(Vec::new());
        let output = self.runtime.block_on(self.server.step(actions, side_channel))?;
        self.parse_step(&output)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.ensure_open()?;
        self.closed = true;
        info!("Closing Unity environment on port {}", self.server.port());
        self.server.close();

        if let Some(mut child) = self.process.take() {
            let deadline = Instant::now() + PROCESS_EXIT_GRACE;
            loop {
                match child.try_wait()? {
                    Some(status) => {
                        debug!("Unity exited with {}", status);
                        break;
                    }
                    None if Instant::now() >= deadline => {
                        warn!("Unity did not exit in time, killing it");
                        child.kill()?;
                        child.wait()?;
                        break;
                    }
                    None => std::thread::sleep(Duration::from_millis(100)),
                }
            }
        }
        Ok(())
    }
}

impl Drop for UnityEnvironment {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Failed to close Unity environment: {}", e);
            }
        }
    }
}

fn spawn_executable(path: &Path, launch: &UnityLaunch) -> Result<Child, EnvError> {
    let exec_path = resolve_executable(path)?;

    let mut command = Command::new(&exec_path);
    if launch.no_graphics {
        command.arg("-nographics").arg("-batchmode");
    }
    command
        .arg("--mlagents-port")
        .arg(launch.port.to_string())
        .arg("-logFile")
        .arg("-")
        .args(&launch.additional_args)
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    info!("Launching {} on port {}", exec_path.display(), launch.port);
    debug!("Launch arguments: {:?}", launch.additional_args);

    command.spawn().map_err(|source| EnvError::Launch {
        path: exec_path,
        source,
    })
}

// macOS .app bundles keep the executable under Contents/MacOS
fn resolve_executable(path: &Path) -> Result<PathBuf, EnvError> {
    if path.extension().and_then(|s| s.to_str()) == Some("app") {
        let macos_dir = path.join("Contents/MacOS");
        let entries = std::fs::read_dir(&macos_dir)
            .map_err(|_| EnvError::ExecutableNotFound(path.to_path_buf()))?;
        for entry in entries.flatten() {
            let candidate = entry.path();
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
        return Err(EnvError::ExecutableNotFound(path.to_path_buf()));
    }

    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(EnvError::ExecutableNotFound(path.to_path_buf()))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn side_channel_of(output: &UnityOutputProto) -> Vec<u8> {
    output
        .rl_output
        .as_ref()
        .map(|rl| rl.side_channel.clone())
        .unwrap_or_default()
}

fn agent_infos<'a>(output: &'a UnityOutputProto, behavior: &str) -> &'a [AgentInfoProto] {
    output
        .rl_output
        .as_ref()
        .and_then(|rl| rl.agent_infos.get(behavior))
        .map(|list| list.value.as_slice())
        .unwrap_or(&[])
}

fn first_visual_observation(info: &AgentInfoProto) -> Result<&ObservationProto, EnvError> {
    info.observations
        .iter()
        .find(|obs| obs.shape.len() == 3)
        .ok_or_else(|| EnvError::Protocol("agent has no visual observation".into()))
}

pub(crate) fn action_space_from_spec(spec: &ActionSpecProto) -> Result<ActionSpace, EnvError> {
    let continuous = spec.num_continuous_actions.max(0) as usize;
    let branches: Vec<usize> = spec
        .discrete_branch_sizes
        .iter()
        .map(|&n| n.max(0) as usize)
        .collect();
    match (continuous, branches.is_empty()) {
        (0, false) => Ok(ActionSpace::Discrete(branches)),
        (n, true) if n > 0 => Ok(ActionSpace::Continuous(n)),
        (0, true) => Err(EnvError::Protocol("behavior has no actions".into())),
        _ => Err(EnvError::Protocol(
            "hybrid continuous/discrete action spaces are not supported".into(),
        )),
    }
}

/// Converts a visual observation into HWC bytes.
pub(crate) fn decode_observation(obs: &ObservationProto) -> Result<Observation, EnvError> {
    let shape = match obs.shape.as_slice() {
        &[h, w, c] if h > 0 && w > 0 && c > 0 => [h as usize, w as usize, c as usize],
        other => {
            return Err(EnvError::Protocol(format!(
                "unsupported observation shape {:?}",
                other
            )))
        }
    };
    let expected = shape.iter().product::<usize>();

    let observation = match &obs.observation_data {
        Some(ObservationData::FloatData(floats)) => Observation::from_unit_floats(shape, &floats.data),
        Some(ObservationData::CompressedData(bytes))
            if obs.compression_type == CompressionTypeProto::Png as i32 =>
        {
            Observation::new(shape, decode_png_stack(bytes, shape)?)
        }
        Some(ObservationData::CompressedData(_)) => {
            return Err(EnvError::Protocol(format!(
                "unknown compression type {}",
                obs.compression_type
            )))
        }
        None => return Err(EnvError::Protocol("observation carries no data".into())),
    };

    if observation.data.len() != expected {
        return Err(EnvError::Protocol(format!(
            "observation has {} values, shape {:?} needs {}",
            observation.data.len(),
            shape,
            expected
        )));
    }
    Ok(observation)
}

// Observations with more than 3 channels arrive as concatenated PNGs
fn decode_png_stack(bytes: &[u8], shape: [usize; 3]) -> Result<Vec<u8>, EnvError> {
    let [height, width, channels] = shape;
    let mut starts: Vec<usize> = bytes
        .windows(PNG_SIGNATURE.len())
        .enumerate()
        .filter(|(_, window)| *window == PNG_SIGNATURE)
        .map(|(i, _)| i)
        .collect();
    if starts.is_empty() {
        return Err(EnvError::Protocol("compressed observation is not a PNG".into()));
    }
    starts.push(bytes.len());

    // planes[c] holds channel c in row-major order
    let mut planes: Vec<Vec<u8>> = Vec::with_capacity(channels);
    for pair in starts.windows(2) {
        let image = image::load(Cursor::new(&bytes[pair[0]..pair[1]]), image::ImageFormat::Png)
            .map_err(|e| EnvError::Protocol(format!("failed to decode PNG observation: {}", e)))?;
        if image.height() as usize != height || image.width() as usize != width {
            return Err(EnvError::Protocol(format!(
                "PNG is {}x{}, expected {}x{}",
                image.width(),
                image.height(),
                width,
                height
            )));
        }
        let remaining = channels - planes.len();
        if remaining == 1 {
            planes.push(image.to_luma8().into_raw());
        } else {
            let rgb = image.to_rgb8().into_raw();
            for c in 0..remaining.min(3) {
                planes.push(rgb.iter().skip(c).step_by(3).copied().collect());
            }
        }
        if planes.len() == channels {
            break;
        }
    }
    if planes.len() != channels {
        return Err(EnvError::Protocol(format!(
            "PNG stack holds {} channels, expected {}",
            planes.len(),
            channels
        )));
    }

    let mut data = Vec::with_capacity(height * width * channels);
    for i in 0..height * width {
        for plane in &planes {
            data.push(plane[i]);
        }
    }
    Ok(data)
}
