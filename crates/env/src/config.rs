//! Tunables of the environment server.

use std::time::Duration;

use pursuit_core::{
    EnvError, CLIENT_TIMEOUT, GAME_TIMEOUT, METRICS_UPDATE_FRAMES, NATIVE_FPS,
    VIRTUAL_COUNTER_FREQUENCY,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A step must advance at least one frame.
    #[error("frameskip must be at least 1")]
    ZeroFrameskip,
    /// The frame period would be infinite or negative.
    #[error("fps must be a positive number, got {0}")]
    InvalidFps(f32),
    /// The virtual counter needs a positive frequency.
    #[error("counter frequency must be positive, got {0}")]
    InvalidCounterFrequency(i64),
    /// Metrics need at least one frame per window.
    #[error("metrics window must span at least one frame")]
    ZeroMetricsWindow,
}

impl From<ConfigError> for EnvError {
    fn from(err: ConfigError) -> Self {
        EnvError::Native(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
/// Settings of one server run.
pub struct EnvConfig {
    /// Let the simulation run against wall-clock time instead of the virtual clock.
    pub real_time: bool,
    /// Frames advanced per STEP.
    pub frameskip: u32,
    /// Native frame rate of the simulation.
    pub fps: f32,
    /// Frequency reported by the virtual counter.
    pub counter_frequency: i64,
    /// Milliseconds to wait for each client request.
    pub client_timeout_ms: u64,
    /// Milliseconds to wait for the simulation to confirm a frame.
    pub game_timeout_ms: u64,
    /// Frames per metrics window.
    pub metrics_every_frames: u64,
    /// Start a fresh game and skip the intro before the handshake.
    pub skip_intro: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            real_time: false,
            frameskip: 1,
            fps: NATIVE_FPS,
            counter_frequency: VIRTUAL_COUNTER_FREQUENCY,
            client_timeout_ms: CLIENT_TIMEOUT.as_millis() as u64,
            game_timeout_ms: GAME_TIMEOUT.as_millis() as u64,
            metrics_every_frames: METRICS_UPDATE_FRAMES,
            skip_intro: true,
        }
    }
}

impl EnvConfig {
    /// Check every value the server depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frameskip == 0 {
            return Err(ConfigError::ZeroFrameskip);
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(ConfigError::InvalidFps(self.fps));
        }
        if self.counter_frequency <= 0 {
            return Err(ConfigError::InvalidCounterFrequency(self.counter_frequency));
        }
        if self.metrics_every_frames == 0 {
            return Err(ConfigError::ZeroMetricsWindow);
        }
        Ok(())
    }

    /// Client request timeout.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    /// Frame confirmation timeout.
    pub fn game_timeout(&self) -> Duration {
        Duration::from_millis(self.game_timeout_ms)
    }

    /// Wall time of one native frame.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }

    /// Virtual counter increment per frame, rounded up.
    pub fn ticks_per_frame(&self) -> i64 {
        (self.counter_frequency as f64 / f64::from(self.fps)).ceil() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_native_simulation() {
        let config = EnvConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ticks_per_frame(), 16_667);
        assert_eq!(config.metrics_every_frames, 1_800);
        assert_eq!(config.client_timeout(), Duration::from_secs(300));
        assert_eq!(config.game_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_skip = EnvConfig {
            frameskip: 0,
            ..EnvConfig::default()
        };
        assert_eq!(zero_skip.validate(), Err(ConfigError::ZeroFrameskip));

        let bad_fps = EnvConfig {
            fps: 0.0,
            ..EnvConfig::default()
        };
        assert!(matches!(bad_fps.validate(), Err(ConfigError::InvalidFps(_))));

        let bad_frequency = EnvConfig {
            counter_frequency: -1,
            ..EnvConfig::default()
        };
        assert_eq!(
            bad_frequency.validate(),
            Err(ConfigError::InvalidCounterFrequency(-1))
        );
    }

    #[test]
    fn ticks_per_frame_rounds_up() {
        let config = EnvConfig {
            counter_frequency: 1_000,
            fps: 30.0,
            ..EnvConfig::default()
        };
        assert_eq!(config.ticks_per_frame(), 34);
    }
}
