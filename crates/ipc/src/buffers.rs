//! The shared buffer set, grouped by handshake phase.

use pursuit_core::{Info, Instruction, ReturnCode, Reward, ServerInfo, Termination};

use crate::doorbell::Doorbell;
use crate::error::IpcError;
use crate::names::{Resource, ResourceNames};
use crate::segment::{MapMode, PodSegment, SharedSegment};

/// Request and response doorbells.
#[derive(Debug)]
pub struct Doorbells {
    /// Rung by the client once a request is written.
    pub request: Doorbell,
    /// Rung by the server once the response is written.
    pub response: Doorbell,
}

impl Doorbells {
    /// Map both doorbells.
    pub fn map(names: &ResourceNames, mode: MapMode) -> Result<Self, IpcError> {
        Ok(Self {
            request: Doorbell::map(names, Resource::RequestDoorbell, mode)?,
            response: Doorbell::map(names, Resource::ResponseDoorbell, mode)?,
        })
    }
}

/// Buffers whose sizes are known before the handshake.
#[derive(Debug)]
pub struct HandshakeBuffers {
    /// Outcome of the last request.
    pub return_code: PodSegment<ReturnCode>,
    /// Negotiated dimensions.
    pub server_info: PodSegment<ServerInfo>,
}

impl HandshakeBuffers {
    /// Map the first-phase buffers.
    pub fn map(names: &ResourceNames, mode: MapMode) -> Result<Self, IpcError> {
        Ok(Self {
            return_code: PodSegment::map(names, Resource::ReturnCode, mode)?,
            server_info: PodSegment::map(names, Resource::ServerInfo, mode)?,
        })
    }
}

/// Buffers sized from the negotiated [`ServerInfo`].
#[derive(Debug)]
pub struct DataBuffers {
    /// Instruction of the current request.
    pub instruction: PodSegment<Instruction>,
    /// One frame of pixels.
    pub observation: SharedSegment,
    /// Diagnostic metrics.
    pub info: PodSegment<Info>,
    /// Reward of the last step.
    pub reward: PodSegment<Reward>,
    /// One byte per input channel.
    pub action: SharedSegment,
    /// Episode end flags.
    pub termination: PodSegment<Termination>,
}

impl DataBuffers {
    /// Map the second-phase buffers for the layout in `info`.
    pub fn map(names: &ResourceNames, info: &ServerInfo, mode: MapMode) -> Result<Self, IpcError> {
        Ok(Self {
            instruction: PodSegment::map(names, Resource::Instruction, mode)?,
            observation: SharedSegment::map(
                names,
                Resource::Observation,
                info.observation_len(),
                mode,
            )?,
            info: PodSegment::map(names, Resource::Info, mode)?,
            reward: PodSegment::map(names, Resource::Reward, mode)?,
            action: SharedSegment::map(names, Resource::Action, info.action_len(), mode)?,
            termination: PodSegment::map(names, Resource::Termination, mode)?,
        })
    }
}
