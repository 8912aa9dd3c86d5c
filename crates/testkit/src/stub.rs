//! Scripted stand-in for the simulation.
//!
//! Each frame run by the simulation thread pops the next [`FrameEvent`] from
//! a queue; frames without a queued event score nothing and survive. The
//! controller-side [`Simulation`] methods read and drain the same state.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use pursuit_core::{EnvError, Input, InputSet};
use pursuit_env::simulation::FrameSink;
use pursuit_env::{CapturedFrame, FrameFormat, PixelFormat, Simulation};

/// What happens during one simulated frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameEvent {
    /// Score gained in the frame.
    pub score: i64,
    /// Whether the player dies in the frame.
    pub dies: bool,
}

impl FrameEvent {
    /// Nothing happens.
    pub const IDLE: Self = Self {
        score: 0,
        dies: false,
    };

    /// Gain `points`.
    pub const fn score(points: i64) -> Self {
        Self {
            score: points,
            dies: false,
        }
    }

    /// Die without scoring.
    pub const fn death() -> Self {
        Self {
            score: 0,
            dies: true,
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    script: VecDeque<FrameEvent>,
    frames: u64,
    pending_score: i64,
    pending_death: bool,
    held: InputSet,
    held_per_frame: Vec<InputSet>,
    counter_samples: Vec<i64>,
    new_games: u32,
    respawns: u32,
}

/// Shared view of the scripted simulation, usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Append events for upcoming frames.
    pub fn queue(&self, events: impl IntoIterator<Item = FrameEvent>) {
        self.state.lock().script.extend(events);
    }

    /// Run one frame. Called from the simulation thread's update.
    ///
    /// `counter` is the performance counter the frame observed, if any.
    pub fn run_frame(&self, counter: Option<i64>) {
        let mut state = self.state.lock();
        let event = state.script.pop_front().unwrap_or(FrameEvent::IDLE);
        state.frames += 1;
        state.pending_score += event.score;
        state.pending_death |= event.dies;
        let held = state.held;
        state.held_per_frame.push(held);
        if let Some(counter) = counter {
            state.counter_samples.push(counter);
        }
    }

    /// Frames run so far.
    pub fn frames(&self) -> u64 {
        self.state.lock().frames
    }

    /// Inputs held in every frame run so far.
    pub fn held_per_frame(&self) -> Vec<InputSet> {
        self.state.lock().held_per_frame.clone()
    }

    /// Counter values observed by the frames run so far.
    pub fn counter_samples(&self) -> Vec<i64> {
        self.state.lock().counter_samples.clone()
    }

    /// New games triggered so far.
    pub fn new_games(&self) -> u32 {
        self.state.lock().new_games
    }

    /// Respawns triggered so far.
    pub fn respawns(&self) -> u32 {
        self.state.lock().respawns
    }

    /// Events still queued.
    pub fn queued(&self) -> usize {
        self.state.lock().script.len()
    }
}

/// [`Simulation`] backed by a [`ScriptHandle`].
#[derive(Debug, Clone)]
pub struct ScriptedSimulation {
    handle: ScriptHandle,
    format: FrameFormat,
    input_channels: u32,
}

impl ScriptedSimulation {
    /// 4x3 X8R8G8B8 frames and the eight standard inputs.
    pub fn new() -> Self {
        Self {
            handle: ScriptHandle::default(),
            format: FrameFormat {
                width: 4,
                height: 3,
                pixel_format: PixelFormat::X8R8G8B8,
            },
            input_channels: Input::COUNT as u32,
        }
    }

    /// Use a different frame geometry.
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Expose a different number of input channels.
    pub fn with_input_channels(mut self, input_channels: u32) -> Self {
        self.input_channels = input_channels;
        self
    }

    /// Handle sharing this simulation's state.
    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }
}

impl Default for ScriptedSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation for ScriptedSimulation {
    fn trigger_new_game(&mut self) -> Result<(), EnvError> {
        self.handle.state.lock().new_games += 1;
        Ok(())
    }

    fn trigger_respawn(&mut self) -> Result<(), EnvError> {
        self.handle.state.lock().respawns += 1;
        Ok(())
    }

    fn pull_terminated_since_last_call(&mut self) -> bool {
        mem::take(&mut self.handle.state.lock().pending_death)
    }

    fn set_held_inputs(&mut self, inputs: InputSet) {
        self.handle.state.lock().held = inputs;
    }

    fn pull_score_delta(&mut self) -> i64 {
        mem::take(&mut self.handle.state.lock().pending_score)
    }

    fn frame_format(&self) -> Result<FrameFormat, EnvError> {
        Ok(self.format)
    }

    /// Every byte of the frame holds the low byte of the frame counter.
    fn capture_current_frame(&mut self, sink: &mut FrameSink<'_>) -> Result<(), EnvError> {
        let fill = self.handle.frames() as u8;
        let pixels = vec![fill; self.format.frame_len()?];
        sink(CapturedFrame {
            format: self.format,
            pixels: &pixels,
        })
    }

    fn input_channel_count(&self) -> u32 {
        self.input_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_consume_the_script_in_order() {
        let mut simulation = ScriptedSimulation::new();
        let handle = simulation.handle();
        handle.queue([FrameEvent::score(3), FrameEvent::death()]);

        simulation.set_held_inputs(InputSet::FIRE);
        handle.run_frame(None);
        assert_eq!(simulation.pull_score_delta(), 3);
        assert!(!simulation.pull_terminated_since_last_call());

        handle.run_frame(Some(10));
        assert!(simulation.pull_terminated_since_last_call());
        assert!(!simulation.pull_terminated_since_last_call());
        assert_eq!(handle.held_per_frame(), vec![InputSet::FIRE; 2]);
        assert_eq!(handle.counter_samples(), vec![10]);
    }

    #[test]
    fn capture_fills_the_frame_with_the_frame_counter() {
        let mut simulation = ScriptedSimulation::new();
        simulation.handle().run_frame(None);
        let mut seen = Vec::new();
        simulation
            .capture_current_frame(&mut |frame| {
                seen.extend_from_slice(frame.pixels);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![1u8; 48]);
    }
}
