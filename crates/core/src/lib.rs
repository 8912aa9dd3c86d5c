#![warn(missing_docs)]
//! Core primitives shared by the environment server, its shared-memory
//! channel and any client driving it.

pub mod error;
pub mod input;
pub mod protocol;

use std::time::Duration;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use error::EnvError;
pub use input::{Input, InputSet};
pub use protocol::{
    ErrorCode, Info, Instruction, InstructionCode, ReturnCode, Reward, ServerInfo, Termination,
};

/// Native frame rate of the simulation.
pub const NATIVE_FPS: f32 = 60.0;

/// Frequency reported by the virtual performance counter.
pub const VIRTUAL_COUNTER_FREQUENCY: i64 = 1_000_000;

/// How long the server waits for the client to ring the request doorbell.
pub const CLIENT_TIMEOUT: Duration = Duration::from_millis(300_000);

/// How long the server waits for the simulation to confirm a frame.
pub const GAME_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Number of frames between two refreshes of the diagnostic metrics.
pub const METRICS_UPDATE_FRAMES: u64 = (NATIVE_FPS as u64) * 30;

/// Count of simulation frames advanced by the server since it started.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FrameCount(pub u64);

impl FrameCount {
    /// Nothing advanced yet.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` frames.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }

    /// True when this count lands on a multiple of `period` (never for zero periods).
    pub fn is_multiple_of(self, period: u64) -> bool {
        period != 0 && self.0 != 0 && self.0 % period == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_advances_and_detects_periods() {
        let count = FrameCount::ZERO.advance(1800);
        assert_eq!(count, FrameCount(1800));
        assert!(count.is_multiple_of(METRICS_UPDATE_FRAMES));
        assert!(!count.advance(1).is_multiple_of(METRICS_UPDATE_FRAMES));
        assert!(!FrameCount::ZERO.is_multiple_of(METRICS_UPDATE_FRAMES));
        assert!(!count.is_multiple_of(0));
    }
}
