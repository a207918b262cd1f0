// Side channels - out-of-band messages exchanged with Unity alongside each step.
//
// Wire format of the side_channel bytes, repeated per message:
// - 16 bytes: channel UUID (little-endian field order)
// - 4 bytes: message length (i32, little-endian)
// - N bytes: message data

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::EnvError;

/// EngineConfigurationChannel
pub const ENGINE_CONFIG_CHANNEL_ID: Uuid = Uuid::from_u128(0xe951342c_4f7e_11ea_b238_784f4387d1f7);

/// EnvironmentParametersChannel
pub const ENV_PARAMS_CHANNEL_ID: Uuid = Uuid::from_u128(0x534c891e_810f_11ea_a9d0_822485860400);

/// Chamber log channel
pub const LOG_CHANNEL_ID: Uuid = Uuid::from_u128(0x621f0a70_4f87_11ea_a6bf_784f4387d1f7);

/// A channel registered with a simulation session.
pub trait SideChannel: Send + Sync {
    fn channel_id(&self) -> Uuid;

    fn on_message_received(&self, msg: IncomingMessage) -> Result<(), EnvError>;

    /// Takes the messages queued since the last exchange.
    fn drain_outgoing(&self) -> Vec<Vec<u8>>;
}

/// Environment parameter data types
#[repr(i32)]
enum EnvironmentDataType {
    Float = 0,
}

/// Message payload builder.
#[derive(Debug, Default)]
pub struct OutgoingMessage {
    buffer: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_int32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_float32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_int32(if value { 1 } else { 0 });
    }

    pub fn write_string(&mut self, s: &str) {
        let encoded = s.as_bytes();
        self.write_int32(encoded.len() as i32);
        self.buffer.extend_from_slice(encoded);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Sequential reader over a received message payload.
#[derive(Debug)]
pub struct IncomingMessage {
    buffer: Vec<u8>,
    offset: usize,
}

impl IncomingMessage {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn read_int32(&mut self) -> Result<i32, EnvError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_float32(&mut self) -> Result<f32, EnvError> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bool(&mut self) -> Result<bool, EnvError> {
        Ok(self.read_int32()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, EnvError> {
        let len = self.read_int32()?;
        let len = usize::try_from(len)
            .map_err(|_| EnvError::SideChannel(format!("negative string length {}", len)))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EnvError::SideChannel(format!("invalid utf-8 string: {}", e)))
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&[u8], EnvError> {
        if self.remaining() < n {
            return Err(EnvError::SideChannel(format!(
                "message truncated: wanted {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        let start = self.offset;
        self.offset += n;
        Ok(&self.buffer[start..self.offset])
    }
}

fn frame_message(channel_id: Uuid, message: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&channel_id.to_bytes_le());
    out.extend_from_slice(&(message.len() as i32).to_le_bytes());
    out.extend_from_slice(message);
}

/// Frames every queued message of every channel into one side_channel payload.
pub fn collect_outgoing(channels: &[Arc<dyn SideChannel>]) -> Vec<u8> {
    let mut result = Vec::new();
    for channel in channels {
        for message in channel.drain_outgoing() {
            frame_message(channel.channel_id(), &message, &mut result);
        }
    }
    result
}

/// Dispatches a received side_channel payload to the registered channels.
///
/// Messages for unknown channels are skipped with a warning.
pub fn process_incoming(data: &[u8], channels: &[Arc<dyn SideChannel>]) -> Result<(), EnvError> {
    let mut offset = 0;
    while offset < data.len() {
        if data.len() - offset < 20 {
            return Err(EnvError::SideChannel(format!(
                "truncated message header at byte {}",
                offset
            )));
        }
        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(&data[offset..offset + 16]);
        let channel_id = Uuid::from_bytes_le(id_bytes);
        offset += 16;

        let len = i32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);
        offset += 4;
        let len = usize::try_from(len)
            .map_err(|_| EnvError::SideChannel(format!("negative message length {}", len)))?;
        if data.len() - offset < len {
            return Err(EnvError::SideChannel(format!(
                "message for channel {} claims {} bytes, {} left",
                channel_id,
                len,
                data.len() - offset
            )));
        }
        let payload = data[offset..offset + len].to_vec();
        offset += len;

        match channels.iter().find(|c| c.channel_id() == channel_id) {
            Some(channel) => channel.on_message_received(IncomingMessage::new(payload))?,
            None => warn!("Unknown side channel data received, channel id {}", channel_id),
        }
    }
    Ok(())
}

/// Serialize environment parameters into side channel format.
///
/// One message per parameter: key string, data type (FLOAT), value.
/// Keys are written in sorted order.
pub fn serialize_environment_parameters(params: &HashMap<String, f32>) -> Vec<u8> {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();

    let mut result = Vec::new();
    for key in keys {
        let mut msg = OutgoingMessage::new();
        msg.write_string(key);
        msg.write_int32(EnvironmentDataType::Float as i32);
        msg.write_float32(params[key]);
        frame_message(ENV_PARAMS_CHANNEL_ID, &msg.into_bytes(), &mut result);
    }
    result
}

/// Engine configuration settings
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    pub quality_level: i32,
    pub time_scale: f32,
    pub target_frame_rate: i32,
    pub capture_frame_rate: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 84,
            height: 84,
            quality_level: 5,
            time_scale: 20.0,
            target_frame_rate: -1,
            capture_frame_rate: 60,
        }
    }
}

/// Engine configuration message types
#[repr(i32)]
enum EngineConfigurationType {
    ScreenResolution = 0,
    QualityLevel = 1,
    TimeScale = 2,
    TargetFrameRate = 3,
    CaptureFrameRate = 4,
}

/// Serialize engine configuration into side channel format.
///
/// One typed message per setting: the configuration type followed by its values.
pub fn serialize_engine_config(config: &EngineConfig) -> Vec<u8> {
    let mut messages = Vec::with_capacity(5);

    let mut msg = OutgoingMessage::new();
    msg.write_int32(EngineConfigurationType::ScreenResolution as i32);
    msg.write_int32(config.width as i32);
    msg.write_int32(config.height as i32);
    messages.push(msg);

    let mut msg = OutgoingMessage::new();
    msg.write_int32(EngineConfigurationType::QualityLevel as i32);
    msg.write_int32(config.quality_level);
    messages.push(msg);

    let mut msg = OutgoingMessage::new();
    msg.write_int32(EngineConfigurationType::TimeScale as i32);
    msg.write_float32(config.time_scale);
    messages.push(msg);

    let mut msg = OutgoingMessage::new();
    msg.write_int32(EngineConfigurationType::TargetFrameRate as i32);
    msg.write_int32(config.target_frame_rate);
    messages.push(msg);

    let mut msg = OutgoingMessage::new();
    msg.write_int32(EngineConfigurationType::CaptureFrameRate as i32);
    msg.write_int32(config.capture_frame_rate);
    messages.push(msg);

    let mut result = Vec::new();
    for msg in messages {
        frame_message(ENGINE_CONFIG_CHANNEL_ID, &msg.into_bytes(), &mut result);
    }
    result
}

/// Chamber log channel.
///
/// Strings received from the simulator are appended, one per line, to
/// `<log_dir>/<run_id>-Env.csv`. Strings passed to [`LogChannel::log_str`]
/// are sent to the simulator on the next exchange.
pub struct LogChannel {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
    outgoing: Mutex<Vec<Vec<u8>>>,
}

impl LogChannel {
    pub fn create(run_id: &str, log_dir: &Path) -> Result<Self, EnvError> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{}-Env.csv", run_id));
        let file = File::create(&path)?;
        debug!("Environment log at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
            outgoing: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_str(&self, msg: &str) -> Result<(), EnvError> {
        let mut out = OutgoingMessage::new();
        out.write_string(msg);
        self.outgoing
            .lock()
            .map_err(|_| EnvError::SideChannel("log channel queue poisoned".into()))?
            .push(out.into_bytes());
        Ok(())
    }
}

impl SideChannel for LogChannel {
    fn channel_id(&self) -> Uuid {
        LOG_CHANNEL_ID
    }

    fn on_message_received(&self, mut msg: IncomingMessage) -> Result<(), EnvError> {
        let line = msg.read_string()?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| EnvError::SideChannel("log file poisoned".into()))?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    fn drain_outgoing(&self) -> Vec<Vec<u8>> {
        match self.outgoing.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_empty_params() {
        let params = HashMap::new();
        assert!(serialize_environment_parameters(&params).is_empty());
    }

    #[test]
    fn test_uuid_written_little_endian() {
        let mut params = HashMap::new();
        params.insert("test".to_string(), 42.0);

        let result = serialize_environment_parameters(&params);

        assert_eq!(
            &result[0..16],
            &[
                0x1e, 0x89, 0x4c, 0x53, 0x0f, 0x81, 0xea, 0x11, 0xa9, 0xd0, 0x82, 0x24, 0x85, 0x86,
                0x04, 0x00
            ]
        );
        // key (4 + 4) + type (4) + value (4)
        let len = i32::from_le_bytes([result[16], result[17], result[18], result[19]]);
        assert_eq!(len, 16);
        assert_eq!(result.len(), 20 + 16);
    }

    #[test]
    fn test_serialize_engine_config_layout() {
        let result = serialize_engine_config(&EngineConfig::default());
        assert_eq!(&result[0..16], &ENGINE_CONFIG_CHANNEL_ID.to_bytes_le());

        // First message: screen resolution (type + width + height)
        let len = i32::from_le_bytes([result[16], result[17], result[18], result[19]]) as usize;
        assert_eq!(len, 12);
        let mut msg = IncomingMessage::new(result[20..20 + len].to_vec());
        assert_eq!(msg.read_int32().unwrap(), 0);
        assert_eq!(msg.read_int32().unwrap(), 84);
        assert_eq!(msg.read_int32().unwrap(), 84);

        // Five framed messages in total: 12 + 4 * 8 payload bytes
        assert_eq!(result.len(), 5 * 20 + 12 + 4 * 8);
    }

    #[test]
    fn test_incoming_message_rejects_truncated_string() {
        let mut out = OutgoingMessage::new();
        out.write_int32(10);
        out.write_bool(true);
        let mut msg = IncomingMessage::new(out.into_bytes());
        assert!(msg.read_string().is_err());
    }

    #[test]
    fn test_log_channel_appends_received_strings() {
        let dir = tempfile::tempdir().unwrap();
        let channel: Arc<dyn SideChannel> = Arc::new(LogChannel::create("run1", dir.path()).unwrap());

        let mut payload = Vec::new();
        for line in ["episode,1", "episode,2"] {
            let mut msg = OutgoingMessage::new();
            msg.write_string(line);
            frame_message(LOG_CHANNEL_ID, &msg.into_bytes(), &mut payload);
        }
        // A message for a channel nobody registered is skipped
        frame_message(Uuid::nil(), &[1, 2, 3], &mut payload);

        process_incoming(&payload, &[channel]).unwrap();

        let written = fs::read_to_string(dir.path().join("run1-Env.csv")).unwrap();
        assert_eq!(written, "episode,1\nepisode,2\n");
    }

    #[test]
    fn test_log_str_is_framed_on_collect() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(LogChannel::create("run2", dir.path()).unwrap());
        log.log_str("hello").unwrap();

        let channels: Vec<Arc<dyn SideChannel>> = vec![log.clone()];
        let bytes = collect_outgoing(&channels);
        assert_eq!(&bytes[0..16], &LOG_CHANNEL_ID.to_bytes_le());

        let mut msg = IncomingMessage::new(bytes[20..].to_vec());
        assert_eq!(msg.read_string().unwrap(), "hello");

        // Queue is drained
        assert!(collect_outgoing(&channels).is_empty());
    }
}
