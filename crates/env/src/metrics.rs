//! Diagnostic metrics reported in the info buffer.

use std::time::{Duration, Instant};

use pursuit_core::{FrameCount, Info};
use tracing::info;

/// Rolling throughput, memory and time accounting for one server run.
#[derive(Debug)]
pub struct EpisodeMetrics {
    window_frames: u64,
    native_fps: f32,
    window_start: Instant,
    step_frames: FrameCount,
    ticks_per_second: f32,
    memory_mb: f32,
    server_time: Duration,
    sim_time: Duration,
}

impl EpisodeMetrics {
    /// Metrics refreshed every `window_frames` frames.
    pub fn new(window_frames: u64, native_fps: f32) -> Self {
        Self {
            window_frames: window_frames.max(1),
            native_fps,
            window_start: Instant::now(),
            step_frames: FrameCount::ZERO,
            ticks_per_second: 0.0,
            memory_mb: 0.0,
            server_time: Duration::ZERO,
            sim_time: Duration::ZERO,
        }
    }

    /// Start the first window and take an initial memory sample.
    pub fn initialize(&mut self) {
        self.window_start = Instant::now();
        self.memory_mb = process_memory_mb();
    }

    /// Account for one more stepped frame. Reset and warm-up frames are not counted.
    pub fn record_frame(&mut self) {
        self.step_frames = self.step_frames.advance(1);
        let total = self.step_frames;
        if total.is_multiple_of(self.window_frames) {
            let elapsed = self.window_start.elapsed().as_secs_f32();
            if elapsed > 0.0 {
                self.ticks_per_second = self.window_frames as f32 / elapsed;
            }
            self.memory_mb = process_memory_mb();
            self.window_start = Instant::now();
        }

        if total.is_multiple_of(self.window_frames * 2) {
            info!(
                frame = total.0,
                tps = self.ticks_per_second,
                speed = self.ticks_per_second / self.native_fps,
                memory_mb = self.memory_mb,
                "Simulation progress"
            );
        }
    }

    /// Frames run by STEP requests so far.
    pub fn step_frames(&self) -> FrameCount {
        self.step_frames
    }

    /// Add wall time spent serving a request.
    pub fn add_server_time(&mut self, elapsed: Duration) {
        self.server_time += elapsed;
    }

    /// Add wall time spent waiting on the simulation.
    pub fn add_sim_time(&mut self, elapsed: Duration) {
        self.sim_time += elapsed;
    }

    /// Current values for the info buffer.
    pub fn snapshot(&self) -> Info {
        Info {
            ticks_per_second: self.ticks_per_second,
            memory_mb: self.memory_mb,
            server_seconds: self.server_time.as_secs_f32(),
            sim_seconds: self.sim_time.as_secs_f32(),
        }
    }
}

/// Resident set size of this process in MiB, or zero where unavailable.
pub fn process_memory_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident_pages) = statm.split_whitespace().nth(1) {
                if let Ok(pages) = resident_pages.parse::<u64>() {
                    let page_size = 4096; // Standard page size
                    return (pages * page_size) as f32 / (1024.0 * 1024.0);
                }
            }
        }
    }
    0.0
}
