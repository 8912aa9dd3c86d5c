//! Frame pacing for real-time mode.

use std::thread;
use std::time::{Duration, Instant};

use pursuit_core::EnvError;
use tracing::warn;

/// Spaces frames at least one native frame period apart.
///
/// The deadline is measured from the start of each frame's work, so a slow
/// frame is not compensated by a shorter next one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealTimePacer {
    frame_period: Duration,
    sleep_margin: Duration,
}

impl RealTimePacer {
    /// Coarse sleeps stop this far before the deadline; the rest is spun.
    pub const SLEEP_MARGIN: Duration = Duration::from_millis(1);

    /// Pacer for `fps` frames per second.
    pub fn new(fps: f32) -> Self {
        Self::with_period(Duration::from_secs_f64(1.0 / f64::from(fps)))
    }

    /// Pacer for an explicit frame period.
    pub fn with_period(frame_period: Duration) -> Self {
        Self {
            frame_period,
            sleep_margin: Self::SLEEP_MARGIN,
        }
    }

    /// Target wall time per frame.
    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }

    /// Run `frame`, then hold until one frame period has passed since it started.
    pub fn run_paced<T>(
        &self,
        frame: impl FnOnce() -> Result<T, EnvError>,
    ) -> Result<T, EnvError> {
        let start = Instant::now();
        let value = frame()?;
        let deadline = start + self.frame_period;

        let now = Instant::now();
        if now >= deadline {
            warn!(
                elapsed_ms = (now - start).as_secs_f64() * 1000.0,
                period_ms = self.frame_period.as_secs_f64() * 1000.0,
                "Step took longer than the intended frame period"
            );
            return Ok(value);
        }

        let remaining = deadline - now;
        if remaining > self.sleep_margin {
            thread::sleep(remaining - self.sleep_margin);
        }
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
        Ok(value)
    }
}
