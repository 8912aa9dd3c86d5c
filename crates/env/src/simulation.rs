//! Services the episode controller expects from the simulation.
//!
//! Implementations poke at simulation memory or drivers; the controller only
//! calls through this trait, which keeps it testable against a stub.

use pursuit_core::{EnvError, InputSet, ServerInfo};

/// Pixel layouts a capture can come back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 24-bit RGB.
    R8G8B8,
    /// 32-bit ARGB.
    A8R8G8B8,
    /// 32-bit RGB with an unused byte.
    X8R8G8B8,
    /// 16-bit 5-6-5 RGB.
    R5G6B5,
    /// 16-bit RGB with an unused bit.
    X1R5G5B5,
    /// 16-bit RGB with one alpha bit.
    A1R5G5B5,
    /// Any other native format code.
    Unknown(u32),
}

impl PixelFormat {
    /// Bytes per pixel of an observation in this format.
    pub fn channels(self) -> Result<u32, EnvError> {
        match self {
            PixelFormat::R8G8B8 => Ok(3),
            PixelFormat::A8R8G8B8 | PixelFormat::X8R8G8B8 => Ok(4),
            other => Err(EnvError::UnsupportedFormat(format!("{other:?}"))),
        }
    }
}

/// Geometry of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub pixel_format: PixelFormat,
}

impl FrameFormat {
    /// Bytes in one frame.
    pub fn frame_len(&self) -> Result<usize, EnvError> {
        Ok(self.width as usize * self.height as usize * self.pixel_format.channels()? as usize)
    }
}

/// A frame borrowed from the simulation for the duration of a capture.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    /// Geometry of `pixels`.
    pub format: FrameFormat,
    /// Row-major pixel bytes.
    pub pixels: &'a [u8],
}

/// Sink receiving a captured frame.
pub type FrameSink<'s> = dyn FnMut(CapturedFrame<'_>) -> Result<(), EnvError> + 's;

/// The simulation as seen from the controller thread.
pub trait Simulation: Send {
    /// Restart the whole game.
    fn trigger_new_game(&mut self) -> Result<(), EnvError>;

    /// Respawn the player in the running game.
    fn trigger_respawn(&mut self) -> Result<(), EnvError>;

    /// Whether the episode ended since the previous call.
    fn pull_terminated_since_last_call(&mut self) -> bool;

    /// Inputs held from the next frame on.
    fn set_held_inputs(&mut self, inputs: InputSet);

    /// Score gained since the previous call.
    fn pull_score_delta(&mut self) -> i64;

    /// Geometry of captured frames.
    fn frame_format(&self) -> Result<FrameFormat, EnvError>;

    /// Hand the current frame to `sink` without copying it first.
    fn capture_current_frame(&mut self, sink: &mut FrameSink<'_>) -> Result<(), EnvError>;

    /// Number of input channels.
    fn input_channel_count(&self) -> u32;
}

/// Layout advertised to the client for `simulation`.
pub fn server_info<S: Simulation + ?Sized>(simulation: &S) -> Result<ServerInfo, EnvError> {
    let format = simulation.frame_format()?;
    let info = ServerInfo {
        obs_height: format.height,
        obs_width: format.width,
        obs_channels: format.pixel_format.channels()?,
        action_count: simulation.input_channel_count(),
    };
    info.validate()?;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pursuit_core::ErrorCode;

    #[test]
    fn eight_bit_formats_map_to_channel_counts() {
        assert_eq!(PixelFormat::R8G8B8.channels().unwrap(), 3);
        assert_eq!(PixelFormat::A8R8G8B8.channels().unwrap(), 4);
        assert_eq!(PixelFormat::X8R8G8B8.channels().unwrap(), 4);
    }

    #[test]
    fn packed_and_unknown_formats_are_unsupported() {
        for format in [
            PixelFormat::R5G6B5,
            PixelFormat::X1R5G5B5,
            PixelFormat::A1R5G5B5,
            PixelFormat::Unknown(50),
        ] {
            assert_eq!(
                format.channels().unwrap_err().code(),
                ErrorCode::UnsupportedFormat
            );
        }
    }

    #[test]
    fn frame_len_multiplies_geometry_and_channels() {
        let format = FrameFormat {
            width: 640,
            height: 480,
            pixel_format: PixelFormat::X8R8G8B8,
        };
        assert_eq!(format.frame_len().unwrap(), 640 * 480 * 4);
    }
}
