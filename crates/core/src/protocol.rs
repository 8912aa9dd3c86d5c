//! Fixed-layout records exchanged with the client through shared memory.
//!
//! Every record is `#[repr(C)]` without padding so both processes agree on its
//! byte layout. Multi-byte fields are native-endian, matching a client running
//! on the same host.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::EnvError;

/// Outcome byte written into the return-code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    /// The request has not been acknowledged yet.
    NotAck = 0xFF,
    /// The request succeeded and the other buffers are valid.
    Acknowledged = 0,
    /// Unclassified failure inside the server.
    NativeError = 1,
    /// The client did not ring the request doorbell in time.
    ClientTimeout = 2,
    /// The simulation did not confirm a frame in time.
    GameTimeout = 3,
    /// The captured frame uses a pixel format the server cannot interpret.
    UnsupportedFormat = 4,
    /// The action buffer pressed an input outside the known set.
    UnknownAction = 5,
    /// STEP was sent before a RESET, or after the episode ended.
    EnvironmentNotReset = 6,
}

impl ErrorCode {
    /// Stable identifier used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAck => "not_ack",
            Self::Acknowledged => "acknowledged",
            Self::NativeError => "native_error",
            Self::ClientTimeout => "client_timeout",
            Self::GameTimeout => "game_timeout",
            Self::UnsupportedFormat => "unsupported_format",
            Self::UnknownAction => "unknown_action",
            Self::EnvironmentNotReset => "environment_not_reset",
        }
    }

    /// Whether a response carrying this code ends the server.
    pub const fn is_fatal(self) -> bool {
        !matches!(
            self,
            Self::NotAck | Self::Acknowledged | Self::UnknownAction | Self::EnvironmentNotReset
        )
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = EnvError;

    fn try_from(value: u8) -> Result<Self, EnvError> {
        match value {
            0xFF => Ok(Self::NotAck),
            0 => Ok(Self::Acknowledged),
            1 => Ok(Self::NativeError),
            2 => Ok(Self::ClientTimeout),
            3 => Ok(Self::GameTimeout),
            4 => Ok(Self::UnsupportedFormat),
            5 => Ok(Self::UnknownAction),
            6 => Ok(Self::EnvironmentNotReset),
            _ => Err(EnvError::Native(format!("invalid return code: {value:#04x}"))),
        }
    }
}

/// Return-code buffer contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ReturnCode {
    /// Raw [`ErrorCode`] byte.
    pub code: u8,
}

impl ReturnCode {
    /// Wrap a code for writing.
    pub const fn new(code: ErrorCode) -> Self {
        Self { code: code as u8 }
    }

    /// Decode the stored byte.
    pub fn error_code(self) -> Result<ErrorCode, EnvError> {
        ErrorCode::try_from(self.code)
    }
}

/// Dimensions negotiated once during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct ServerInfo {
    /// Observation height in pixels.
    pub obs_height: u32,
    /// Observation width in pixels.
    pub obs_width: u32,
    /// Bytes per pixel.
    pub obs_channels: u32,
    /// Number of bytes in the action buffer.
    pub action_count: u32,
}

impl ServerInfo {
    /// Size of the observation buffer in bytes.
    pub fn observation_len(&self) -> usize {
        self.obs_width as usize * self.obs_height as usize * self.obs_channels as usize
    }

    /// Size of the action buffer in bytes.
    pub fn action_len(&self) -> usize {
        self.action_count as usize
    }

    /// Reject layouts that would produce empty buffers.
    pub fn validate(&self) -> Result<(), EnvError> {
        if self.observation_len() == 0 {
            return Err(EnvError::UnsupportedFormat(format!(
                "empty observation {}x{}x{}",
                self.obs_width, self.obs_height, self.obs_channels
            )));
        }
        if self.action_count == 0 {
            return Err(EnvError::Native("simulation exposes no inputs".into()));
        }
        Ok(())
    }
}

/// Instruction codes understood by the episode controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionCode {
    /// Respawn if the episode is still running, otherwise keep the dead state.
    ResetNewLife,
    /// Start a whole new game.
    ResetNewGame,
    /// Advance `frameskip` frames with the current action buffer.
    Step,
    /// Stop the server.
    Close,
    /// Anything else; ignored by the controller.
    Unknown(u32),
}

impl InstructionCode {
    /// Decode a raw instruction word.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::ResetNewLife,
            2 => Self::ResetNewGame,
            3 => Self::Step,
            0xFF => Self::Close,
            other => Self::Unknown(other),
        }
    }

    /// Encode as the raw instruction word.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::ResetNewLife => 1,
            Self::ResetNewGame => 2,
            Self::Step => 3,
            Self::Close => 0xFF,
            Self::Unknown(other) => other,
        }
    }
}

/// Instruction buffer contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Instruction {
    /// Raw [`InstructionCode`] word.
    pub code: u32,
}

impl Instruction {
    /// Wrap an instruction for writing.
    pub const fn new(code: InstructionCode) -> Self {
        Self {
            code: code.to_raw(),
        }
    }

    /// Decoded instruction code.
    pub const fn code(self) -> InstructionCode {
        InstructionCode::from_raw(self.code)
    }
}

/// Diagnostic metrics returned with every reset and step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Info {
    /// Simulated frames per wall-clock second over the last metrics window.
    pub ticks_per_second: f32,
    /// Resident memory of the server process.
    pub memory_mb: f32,
    /// Wall time spent handling resets and steps.
    pub server_seconds: f32,
    /// Wall time spent waiting on the simulation to advance frames.
    pub sim_seconds: f32,
}

/// Reward accumulated over one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Reward {
    /// Sum of the score deltas pulled during the step.
    pub reward: f32,
}

/// Episode end flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Termination {
    /// Non-zero when the simulation ended the episode.
    pub terminated: u8,
    /// Non-zero when an external cutoff ended the episode.
    pub truncated: u8,
}

impl Termination {
    /// Neither flag set.
    pub const NONE: Self = Self {
        terminated: 0,
        truncated: 0,
    };

    /// Build from booleans.
    pub const fn new(terminated: bool, truncated: bool) -> Self {
        Self {
            terminated: terminated as u8,
            truncated: truncated as u8,
        }
    }

    /// Whether the simulation ended the episode.
    pub const fn is_terminated(self) -> bool {
        self.terminated != 0
    }

    /// Whether an external cutoff ended the episode.
    pub const fn is_truncated(self) -> bool {
        self.truncated != 0
    }

    /// True when either flag is set.
    pub const fn is_done(self) -> bool {
        self.is_terminated() || self.is_truncated()
    }
}

const _: () = assert!(std::mem::size_of::<ReturnCode>() == 1);
const _: () = assert!(std::mem::size_of::<ServerInfo>() == 16);
const _: () = assert!(std::mem::size_of::<Instruction>() == 4);
const _: () = assert!(std::mem::size_of::<Info>() == 16);
const _: () = assert!(std::mem::size_of::<Reward>() == 4);
const _: () = assert!(std::mem::size_of::<Termination>() == 2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip_through_the_wire_byte() {
        for code in [
            ErrorCode::NotAck,
            ErrorCode::Acknowledged,
            ErrorCode::NativeError,
            ErrorCode::ClientTimeout,
            ErrorCode::GameTimeout,
            ErrorCode::UnsupportedFormat,
            ErrorCode::UnknownAction,
            ErrorCode::EnvironmentNotReset,
        ] {
            assert_eq!(ErrorCode::try_from(code as u8).unwrap(), code);
        }
        assert!(ErrorCode::try_from(7).is_err());
    }

    #[test]
    fn only_misuse_codes_are_non_fatal() {
        assert!(!ErrorCode::UnknownAction.is_fatal());
        assert!(!ErrorCode::EnvironmentNotReset.is_fatal());
        assert!(ErrorCode::ClientTimeout.is_fatal());
        assert!(ErrorCode::GameTimeout.is_fatal());
        assert!(ErrorCode::UnsupportedFormat.is_fatal());
        assert!(ErrorCode::NativeError.is_fatal());
    }

    #[test]
    fn instruction_codes_decode_known_words_and_keep_unknown_ones() {
        assert_eq!(InstructionCode::from_raw(1), InstructionCode::ResetNewLife);
        assert_eq!(InstructionCode::from_raw(2), InstructionCode::ResetNewGame);
        assert_eq!(InstructionCode::from_raw(3), InstructionCode::Step);
        assert_eq!(InstructionCode::from_raw(0xFF), InstructionCode::Close);
        assert_eq!(InstructionCode::from_raw(42), InstructionCode::Unknown(42));
        assert_eq!(Instruction::new(InstructionCode::Close).code, 0xFF);
    }

    #[test]
    fn single_byte_instruction_writes_decode_like_full_words() {
        let mut raw = [0u8; 4];
        raw[0] = 3;
        let instruction: Instruction = bytemuck::pod_read_unaligned(&raw);
        assert_eq!(instruction.code(), InstructionCode::Step);
    }

    #[test]
    fn server_info_layout_matches_field_order() {
        let info = ServerInfo {
            obs_height: 1,
            obs_width: 2,
            obs_channels: 3,
            action_count: 8,
        };
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&info));
        assert_eq!(words, &[1, 2, 3, 8]);
        assert_eq!(info.observation_len(), 6);
        assert!(info.validate().is_ok());
    }

    #[test]
    fn server_info_rejects_empty_buffers() {
        let info = ServerInfo {
            obs_height: 0,
            obs_width: 640,
            obs_channels: 4,
            action_count: 8,
        };
        assert_eq!(
            info.validate().unwrap_err().code(),
            ErrorCode::UnsupportedFormat
        );
    }

    #[test]
    fn termination_is_done_when_either_flag_is_set() {
        assert!(!Termination::NONE.is_done());
        assert!(Termination::new(true, false).is_done());
        assert!(Termination::new(false, true).is_done());
        assert_eq!(bytemuck::bytes_of(&Termination::new(true, false)), &[1, 0]);
    }
}
