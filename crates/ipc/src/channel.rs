//! Server side of the request/response protocol.
//!
//! The channel opens the resources created by the client, performs the
//! two-phase handshake, and then serves one instruction per doorbell ring.
//! Failures inside a handler are turned into a return code before the
//! response doorbell is rung, so the client never reads stale buffers.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use pursuit_core::{
    EnvError, ErrorCode, Info, InputSet, InstructionCode, ReturnCode, Reward, ServerInfo,
    Termination, CLIENT_TIMEOUT,
};
use tracing::{debug, error, info, warn};

use crate::buffers::{DataBuffers, Doorbells, HandshakeBuffers};
use crate::error::IpcError;
use crate::names::ResourceNames;
use crate::segment::MapMode;

/// Settings for [`RequestChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Where the client created the resources.
    pub names: ResourceNames,
    /// How long to wait for each request.
    pub client_timeout: Duration,
}

impl ChannelConfig {
    /// Config with the default client timeout.
    pub fn new(names: ResourceNames) -> Self {
        Self {
            names,
            client_timeout: CLIENT_TIMEOUT,
        }
    }
}

/// Server end of the shared-memory channel.
///
/// Not thread safe: it is driven by a single control loop.
#[derive(Debug)]
pub struct RequestChannel {
    names: ResourceNames,
    client_timeout: Duration,
    doorbells: Option<Doorbells>,
    handshake: Option<HandshakeBuffers>,
    data: Option<DataBuffers>,
    server_info: Option<ServerInfo>,
    error_pending_ack: bool,
}

impl RequestChannel {
    /// Build an unconnected channel.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            names: config.names,
            client_timeout: config.client_timeout,
            doorbells: None,
            handshake: None,
            data: None,
            server_info: None,
            error_pending_ack: false,
        }
    }

    /// Run the two-phase handshake advertising `server_info`.
    ///
    /// Phase one answers the client's first ring with ACK and the server info.
    /// Phase two answers the next ring after opening the buffers whose sizes
    /// depend on that info.
    pub fn connect(&mut self, server_info: ServerInfo) -> Result<(), EnvError> {
        server_info.validate()?;
        self.doorbells = Some(Doorbells::map(&self.names, MapMode::Open)?);
        info!(prefix = %self.names.prefix(), "Waiting for client handshake");

        self.sync_on_client_query(|channel| {
            let mut handshake = HandshakeBuffers::map(&channel.names, MapMode::Open)?;
            handshake
                .return_code
                .write(&ReturnCode::new(ErrorCode::Acknowledged));
            handshake.server_info.write(&server_info);
            channel.handshake = Some(handshake);
            channel.server_info = Some(server_info);
            Ok(())
        })?;
        debug!(?server_info, "Handshake phase one complete");

        self.sync_on_client_query(|channel| {
            channel.data = Some(DataBuffers::map(
                &channel.names,
                &server_info,
                MapMode::Open,
            )?);
            Ok(())
        })?;
        info!(
            width = server_info.obs_width,
            height = server_info.obs_height,
            channels = server_info.obs_channels,
            actions = server_info.action_count,
            "Client connected"
        );
        Ok(())
    }

    /// Serve one request: wait for the client, decode the instruction and run `handler`.
    ///
    /// Non-fatal handler errors are reported to the client and swallowed;
    /// fatal ones are reported and returned. A panicking handler counts as a
    /// fatal native error.
    pub fn execute_on_instruction<F>(&mut self, handler: F) -> Result<(), EnvError>
    where
        F: FnOnce(InstructionCode, &mut RequestChannel) -> Result<(), EnvError>,
    {
        self.sync_on_client_query(|channel| {
            let code = channel.data()?.instruction.read().code();
            debug!(?code, "Received instruction");
            handler(code, channel)
        })
    }

    fn sync_on_client_query<F>(&mut self, action: F) -> Result<(), EnvError>
    where
        F: FnOnce(&mut RequestChannel) -> Result<(), EnvError>,
    {
        let requested = self
            .doorbells
            .as_ref()
            .ok_or(IpcError::NotConnected)?
            .request
            .wait(self.client_timeout);

        if !requested {
            let err = EnvError::ClientTimeout(self.client_timeout);
            error!(%err, "Client went silent");
            self.respond_with_fatal(&err);
            return Err(err);
        }

        if self.error_pending_ack {
            self.write_ack()?;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| action(self))).unwrap_or_else(|panic| {
            let message = panic_message(panic);
            error!(%message, "Request handler panicked");
            Err(EnvError::Native(message))
        });

        match outcome {
            Ok(()) => {
                self.ring_response()?;
                Ok(())
            }
            Err(err) if !err.is_fatal() => {
                warn!(%err, code = err.code().as_str(), "Request rejected");
                let written = self.write_non_fatal_error(err.code());
                self.ring_response()?;
                written
            }
            Err(err) => {
                self.respond_with_fatal(&err);
                Err(err)
            }
        }
    }

    /// Best effort: the original error wins over any failure to report it.
    fn respond_with_fatal(&mut self, err: &EnvError) {
        if let Err(write_err) = self.write_return_code(err.code()) {
            warn!(%write_err, "Could not report fatal error to client");
        }
        if let Err(ring_err) = self.ring_response() {
            warn!(%ring_err, "Could not ring response doorbell");
        }
    }

    fn ring_response(&self) -> Result<(), IpcError> {
        self.doorbells
            .as_ref()
            .ok_or(IpcError::NotConnected)?
            .response
            .ring()
    }

    fn handshake(&mut self) -> Result<&mut HandshakeBuffers, IpcError> {
        self.handshake.as_mut().ok_or(IpcError::NotConnected)
    }

    fn data(&self) -> Result<&DataBuffers, IpcError> {
        self.data.as_ref().ok_or(IpcError::NotConnected)
    }

    fn data_mut(&mut self) -> Result<&mut DataBuffers, IpcError> {
        self.data.as_mut().ok_or(IpcError::NotConnected)
    }

    /// Negotiated layout, once phase one completed.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
    }

    /// Whether both handshake phases completed.
    pub fn is_connected(&self) -> bool {
        self.data.is_some()
    }

    /// Decode the action buffer.
    pub fn read_actions(&self) -> Result<InputSet, EnvError> {
        InputSet::from_action_bytes(self.data()?.action.bytes())
    }

    /// Copy one frame into the observation buffer.
    pub fn write_observation(&mut self, pixels: &[u8]) -> Result<(), EnvError> {
        self.data_mut()?.observation.write_bytes(pixels)?;
        Ok(())
    }

    /// Publish diagnostic metrics.
    pub fn write_info(&mut self, info: &Info) -> Result<(), EnvError> {
        self.data_mut()?.info.write(info);
        Ok(())
    }

    /// Publish the reward of a step.
    pub fn write_reward(&mut self, reward: f32) -> Result<(), EnvError> {
        self.data_mut()?.reward.write(&Reward { reward });
        Ok(())
    }

    /// Publish the episode end flags.
    pub fn write_termination(&mut self, termination: Termination) -> Result<(), EnvError> {
        self.data_mut()?.termination.write(&termination);
        Ok(())
    }

    /// Mark the current request as acknowledged.
    pub fn write_ack(&mut self) -> Result<(), EnvError> {
        self.error_pending_ack = false;
        self.write_return_code(ErrorCode::Acknowledged)
    }

    /// Report a recoverable error; the next request starts from ACK again.
    pub fn write_non_fatal_error(&mut self, code: ErrorCode) -> Result<(), EnvError> {
        self.write_return_code(code)?;
        self.error_pending_ack = true;
        Ok(())
    }

    /// Overwrite the return code.
    pub fn write_return_code(&mut self, code: ErrorCode) -> Result<(), EnvError> {
        self.handshake()?.return_code.write(&ReturnCode::new(code));
        Ok(())
    }

    /// Release every mapping. The client owns the resources, so nothing is unlinked.
    pub fn dispose(&mut self) {
        self.data = None;
        self.handshake = None;
        self.doorbells = None;
        debug!(prefix = %self.names.prefix(), "Channel disposed");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "request handler panicked".to_string()
    }
}
