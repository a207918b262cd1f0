// gRPC server following the ML-Agents RpcCommunicator pattern.
// The trainer is the SERVER, Unity is the CLIENT that connects to it.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::communicator_objects::unity_to_external_proto_server::{
    UnityToExternalProto, UnityToExternalProtoServer,
};
use crate::communicator_objects::{
    CommandProto, HeaderProto, UnityInputProto, UnityMessageProto, UnityOutputProto,
    UnityRlCapabilitiesProto, UnityRlInitializationInputProto, UnityRlInitializationOutputProto,
    UnityRlInputProto,
};
use crate::error::EnvError;

pub const COMMUNICATION_VERSION: &str = "1.5.0";

/// Address the communicator listens on; Unity may connect from any interface.
pub const BIND_ADDR: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

const STATUS_OK: i32 = 200;
const STATUS_CLOSE: i32 = 400;

// Channel-based bridge between the gRPC service and the trainer loop
#[derive(Clone)]
pub struct UnityServiceImpl {
    // Unity -> trainer
    unity_to_trainer_tx: mpsc::UnboundedSender<UnityMessageProto>,
    // trainer -> Unity
    trainer_to_unity_rx: Arc<Mutex<mpsc::UnboundedReceiver<UnityMessageProto>>>,
}

impl UnityServiceImpl {
    pub fn new(
        unity_to_trainer_tx: mpsc::UnboundedSender<UnityMessageProto>,
        trainer_to_unity_rx: mpsc::UnboundedReceiver<UnityMessageProto>,
    ) -> Self {
        Self {
            unity_to_trainer_tx,
            trainer_to_unity_rx: Arc::new(Mutex::new(trainer_to_unity_rx)),
        }
    }
}

#[tonic::async_trait]
impl UnityToExternalProto for UnityServiceImpl {
    async fn exchange(
        &self,
        request: Request<UnityMessageProto>,
    ) -> Result<Response<UnityMessageProto>, Status> {
        self.unity_to_trainer_tx
            .send(request.into_inner())
            .map_err(|e| Status::internal(format!("Failed to send to trainer: {}", e)))?;

        let mut rx = self.trainer_to_unity_rx.lock().await;
        let response = rx
            .recv()
            .await
            .ok_or_else(|| Status::internal("Trainer channel closed"))?;

        Ok(Response::new(response))
    }
}

/// Parameters sent to Unity in the initialization input.
#[derive(Clone, Debug)]
pub struct InitConfig {
    pub seed: i32,
    pub num_areas: i32,
    pub communication_version: String,
    pub package_version: String,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_areas: 1,
            communication_version: COMMUNICATION_VERSION.to_string(),
            package_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Outputs collected during the handshake.
#[derive(Clone, Debug)]
pub struct Handshake {
    /// Academy parameters and brain specs sent by Unity on connect.
    pub init_output: UnityRlInitializationOutputProto,
    /// First output after the initial reset, carrying the agents' first infos.
    pub first_output: UnityOutputProto,
}

pub struct GrpcServer {
    port: u16,
    timeout: Duration,
    unity_to_trainer_rx: mpsc::UnboundedReceiver<UnityMessageProto>,
    trainer_to_unity_tx: mpsc::UnboundedSender<UnityMessageProto>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl GrpcServer {
    /// Binds the listener and spawns the server task.
    ///
    /// Must be called from within a tokio runtime context. Binding happens
    /// before the task is spawned so an unavailable port is reported here.
    pub fn bind(port: u16, timeout: Duration) -> Result<Self, EnvError> {
        let (unity_to_trainer_tx, unity_to_trainer_rx) = mpsc::unbounded_channel();
        let (trainer_to_unity_tx, trainer_to_unity_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let service = UnityServiceImpl::new(unity_to_trainer_tx, trainer_to_unity_rx);
        let addr = SocketAddr::from((BIND_ADDR, port));
        let incoming = TcpIncoming::new(addr, true, None)
            .map_err(|e| EnvError::Communicator(format!("failed to bind {}: {}", addr, e)))?;

        tokio::spawn(async move {
            let served = Server::builder()
                .add_service(UnityToExternalProtoServer::new(service))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!("gRPC server on port {} stopped: {}", port, e);
            }
        });

        debug!("gRPC server listening on {}", addr);

        Ok(Self {
            port,
            timeout,
            unity_to_trainer_rx,
            trainer_to_unity_tx,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for Unity to connect, exchanges initialization parameters and
    /// performs the first reset.
    pub async fn initialize(
        &mut self,
        init_config: &InitConfig,
        reset_side_channel: Vec<u8>,
    ) -> Result<Handshake, EnvError> {
        // Unity sends OUTPUT first (academy parameters and brain specs)
        let unity_init = self.recv().await?;
        let init_output = unity_init
            .unity_output
            .and_then(|output| output.rl_initialization_output)
            .ok_or_else(|| EnvError::Protocol("no initialization output from Unity".into()))?;

        info!(
            "Connected to Unity environment '{}' (communication {}, package {})",
            init_output.name, init_output.communication_version, init_output.package_version
        );
        if init_output.communication_version != init_config.communication_version {
            warn!(
                "Communication version mismatch: trainer {}, Unity {}",
                init_config.communication_version, init_output.communication_version
            );
        }

        let capabilities = UnityRlCapabilitiesProto {
            base_rl_capabilities: true,
            concatenated_png_observations: true,
            compressed_channel_mapping: true,
            hybrid_actions: true,
            training_analytics: false,
            variable_length_observation: true,
            multi_agent_groups: true,
        };

        let init_input = UnityInputProto {
            rl_input: None,
            rl_initialization_input: Some(UnityRlInitializationInputProto {
                seed: init_config.seed,
                communication_version: init_config.communication_version.clone(),
                package_version: init_config.package_version.clone(),
                capabilities: Some(capabilities),
                num_areas: init_config.num_areas,
            }),
        };
        self.send(STATUS_OK, Some(init_input))?;

        // Unity acknowledges with an empty message
        let _ack = self.recv().await?;

        let first_output = self.reset(reset_side_channel).await?;

        Ok(Handshake {
            init_output,
            first_output,
        })
    }

    pub async fn step(
        &mut self,
        agent_actions: HashMap<String, crate::communicator_objects::unity_rl_input_proto::ListAgentActionProto>,
        side_channel: Vec<u8>,
    ) -> Result<UnityOutputProto, EnvError> {
        let input = UnityInputProto {
            rl_input: Some(UnityRlInputProto {
                agent_actions,
                command: CommandProto::Step as i32,
                side_channel,
            }),
            rl_initialization_input: None,
        };
        self.exchange(input).await
    }

    pub async fn reset(&mut self, side_channel: Vec<u8>) -> Result<UnityOutputProto, EnvError> {
        let input = UnityInputProto {
            rl_input: Some(UnityRlInputProto {
                agent_actions: HashMap::new(),
                command: CommandProto::Reset as i32,
                side_channel,
            }),
            rl_initialization_input: None,
        };
        self.exchange(input).await
    }

    /// Tells Unity to shut down and stops the server.
    pub fn close(&mut self) {
        // Answers the pending Exchange call; Unity quits on status 400.
        if self.send(STATUS_CLOSE, None).is_err() {
            debug!("Unity already disconnected from port {}", self.port);
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    async fn exchange(&mut self, input: UnityInputProto) -> Result<UnityOutputProto, EnvError> {
        self.send(STATUS_OK, Some(input))?;
        let response = self.recv().await?;

        if let Some(header) = &response.header {
            if header.status != STATUS_OK && header.status != 0 {
                return Err(EnvError::Communicator(format!(
                    "Unity returned status {}: {}",
                    header.status, header.message
                )));
            }
        }

        response
            .unity_output
            .ok_or_else(|| EnvError::Protocol("no output from Unity".into()))
    }

    fn send(&self, status: i32, input: Option<UnityInputProto>) -> Result<(), EnvError> {
        let message = UnityMessageProto {
            header: Some(HeaderProto {
                status,
                message: String::new(),
            }),
            unity_output: None,
            unity_input: input,
        };
        self.trainer_to_unity_tx
            .send(message)
            .map_err(|e| EnvError::Communicator(format!("failed to send to Unity: {}", e)))
    }

    async fn recv(&mut self) -> Result<UnityMessageProto, EnvError> {
        match tokio::time::timeout(self.timeout, self.unity_to_trainer_rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(EnvError::Communicator("Unity disconnected".into())),
            Err(_) => Err(EnvError::Timeout(self.timeout)),
        }
    }
}

impl Drop for GrpcServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_config_defaults() {
        let config = InitConfig::default();
        assert_eq!(config.communication_version, "1.5.0");
        assert_eq!(config.num_areas, 1);
    }

    #[tokio::test]
    async fn test_service_forwards_messages_both_ways() {
        let (to_trainer_tx, mut to_trainer_rx) = mpsc::unbounded_channel();
        let (to_unity_tx, to_unity_rx) = mpsc::unbounded_channel();
        let service = UnityServiceImpl::new(to_trainer_tx, to_unity_rx);

        let reply = UnityMessageProto {
            header: Some(HeaderProto { status: STATUS_OK, message: String::new() }),
            unity_output: None,
            unity_input: None,
        };
        to_unity_tx.send(reply.clone()).unwrap();

        let request = UnityMessageProto {
            header: Some(HeaderProto { status: STATUS_OK, message: "hello".into() }),
            unity_output: Some(UnityOutputProto::default()),
            unity_input: None,
        };
        let response = service.exchange(Request::new(request.clone())).await.unwrap();

        assert_eq!(response.into_inner(), reply);
        assert_eq!(to_trainer_rx.recv().await.unwrap(), request);
    }
}
