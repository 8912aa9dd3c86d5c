//! Controller side of the protocol.
//!
//! The client owns every shared resource: it creates them before the server
//! connects and unlinks them when dropped.

use std::time::Duration;

use pursuit_core::{
    EnvError, ErrorCode, Info, InputSet, Instruction, InstructionCode, ReturnCode, ServerInfo,
    Termination,
};
use thiserror::Error;
use tracing::debug;

use crate::buffers::{DataBuffers, Doorbells, HandshakeBuffers};
use crate::error::IpcError;
use crate::names::ResourceNames;
use crate::segment::MapMode;

/// Error seen by the controller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Shared-memory failure on the client side.
    #[error(transparent)]
    Ipc(#[from] IpcError),
    /// The server did not ring the response doorbell in time.
    #[error("server did not respond within {0:?}")]
    Timeout(Duration),
    /// The server answered with a non-ACK return code.
    #[error("server answered {}", .0.as_str())]
    Server(ErrorCode),
    /// A step or reset was attempted before the handshake.
    #[error("client has not completed the handshake")]
    NotConnected,
    /// The return-code byte could not be decoded.
    #[error(transparent)]
    Protocol(#[from] EnvError),
}

/// Settings for [`EnvClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where to create the resources.
    pub names: ResourceNames,
    /// How long to wait for each response.
    pub response_timeout: Duration,
}

impl ClientConfig {
    /// Config with a generous response timeout.
    pub fn new(names: ResourceNames) -> Self {
        Self {
            names,
            response_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of one STEP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Reward accumulated over the step.
    pub reward: f32,
    /// Episode end flags after the step.
    pub termination: Termination,
    /// Diagnostic metrics.
    pub info: Info,
}

/// Client end of the shared-memory channel.
#[derive(Debug)]
pub struct EnvClient {
    names: ResourceNames,
    response_timeout: Duration,
    doorbells: Doorbells,
    handshake: HandshakeBuffers,
    data: Option<DataBuffers>,
    server_info: Option<ServerInfo>,
    closed: bool,
}

impl EnvClient {
    /// Create the doorbells and the first-phase buffers.
    pub fn create(config: ClientConfig) -> Result<Self, ClientError> {
        let doorbells = Doorbells::map(&config.names, MapMode::Create)?;
        let mut handshake = HandshakeBuffers::map(&config.names, MapMode::Create)?;
        handshake.return_code.write(&ReturnCode::new(ErrorCode::NotAck));
        debug!(prefix = %config.names.prefix(), "Client resources created");

        Ok(Self {
            names: config.names,
            response_timeout: config.response_timeout,
            doorbells,
            handshake,
            data: None,
            server_info: None,
            closed: false,
        })
    }

    /// Run both handshake phases and return the negotiated layout.
    pub fn handshake(&mut self) -> Result<ServerInfo, ClientError> {
        self.expect_ack()?;
        let info = self.handshake.server_info.read();
        self.data = Some(DataBuffers::map(&self.names, &info, MapMode::Create)?);
        self.server_info = Some(info);
        self.expect_ack()?;
        Ok(info)
    }

    /// Layout negotiated by [`EnvClient::handshake`].
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
    }

    /// Start a new episode; `new_game` forces a full restart.
    pub fn reset(&mut self, new_game: bool) -> Result<Info, ClientError> {
        let code = if new_game {
            InstructionCode::ResetNewGame
        } else {
            InstructionCode::ResetNewLife
        };
        self.send(code)?;
        Ok(self.data()?.info.read())
    }

    /// Hold `inputs` for one step and collect the outcome.
    pub fn step(&mut self, inputs: InputSet) -> Result<StepOutcome, ClientError> {
        let actions = inputs.to_action_bytes(self.data()?.action.len());
        self.step_raw(&actions)
    }

    /// Step with one byte per input channel, exactly as given.
    pub fn step_raw(&mut self, actions: &[u8]) -> Result<StepOutcome, ClientError> {
        self.data_mut()?.action.write_bytes(actions)?;
        self.send(InstructionCode::Step)?;

        let data = self.data()?;
        Ok(StepOutcome {
            reward: data.reward.read().reward,
            termination: data.termination.read(),
            info: data.info.read(),
        })
    }

    /// Current contents of the observation buffer.
    pub fn observation(&self) -> Result<&[u8], ClientError> {
        Ok(self.data()?.observation.bytes())
    }

    /// Current episode end flags.
    pub fn termination(&self) -> Result<Termination, ClientError> {
        Ok(self.data()?.termination.read())
    }

    /// Ask the server to stop. Later calls do nothing.
    pub fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.send(InstructionCode::Close)?;
        self.closed = true;
        Ok(())
    }

    /// Whether [`EnvClient::close`] went through.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send an arbitrary instruction word and return the raw answer.
    pub fn send_raw(&mut self, code: u32) -> Result<ErrorCode, ClientError> {
        self.data_mut()?.instruction.write(&Instruction { code });
        self.exchange()
    }

    /// Decode the return-code buffer.
    pub fn return_code(&self) -> Result<ErrorCode, ClientError> {
        Ok(self.handshake.return_code.read().error_code()?)
    }

    /// Consume a pending response ring without blocking.
    pub fn take_response(&self) -> bool {
        self.doorbells.response.try_take()
    }

    fn send(&mut self, code: InstructionCode) -> Result<(), ClientError> {
        match self.send_raw(code.to_raw())? {
            ErrorCode::Acknowledged => Ok(()),
            other => Err(ClientError::Server(other)),
        }
    }

    fn expect_ack(&mut self) -> Result<(), ClientError> {
        match self.exchange()? {
            ErrorCode::Acknowledged => Ok(()),
            other => Err(ClientError::Server(other)),
        }
    }

    fn exchange(&mut self) -> Result<ErrorCode, ClientError> {
        self.doorbells.request.ring()?;
        if !self.doorbells.response.wait(self.response_timeout) {
            return Err(ClientError::Timeout(self.response_timeout));
        }
        self.return_code()
    }

    fn data(&self) -> Result<&DataBuffers, ClientError> {
        self.data.as_ref().ok_or(ClientError::NotConnected)
    }

    fn data_mut(&mut self) -> Result<&mut DataBuffers, ClientError> {
        self.data.as_mut().ok_or(ClientError::NotConnected)
    }
}
