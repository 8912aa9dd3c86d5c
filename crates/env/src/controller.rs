//! Episode state machine driven by client instructions.

use std::sync::Arc;
use std::time::Instant;

use pursuit_core::{EnvError, FrameCount, Info, InputSet, InstructionCode, Termination};
use pursuit_ipc::RequestChannel;
use tracing::{debug, info};

use crate::config::EnvConfig;
use crate::metrics::EpisodeMetrics;
use crate::pacer::RealTimePacer;
use crate::rendezvous::FrameRendezvous;
use crate::simulation::Simulation;

/// Buffers a reset or step reads from and answers into.
pub trait ResponseBuffers {
    /// Inputs requested by the client.
    fn read_actions(&self) -> Result<InputSet, EnvError>;

    /// Publish one observation.
    fn write_observation(&mut self, pixels: &[u8]) -> Result<(), EnvError>;

    /// Publish diagnostic metrics.
    fn write_info(&mut self, info: &Info) -> Result<(), EnvError>;

    /// Publish the step reward.
    fn write_reward(&mut self, reward: f32) -> Result<(), EnvError>;

    /// Publish the episode end flags.
    fn write_termination(&mut self, termination: Termination) -> Result<(), EnvError>;
}

impl ResponseBuffers for RequestChannel {
    fn read_actions(&self) -> Result<InputSet, EnvError> {
        RequestChannel::read_actions(self)
    }

    fn write_observation(&mut self, pixels: &[u8]) -> Result<(), EnvError> {
        RequestChannel::write_observation(self, pixels)
    }

    fn write_info(&mut self, info: &Info) -> Result<(), EnvError> {
        RequestChannel::write_info(self, info)
    }

    fn write_reward(&mut self, reward: f32) -> Result<(), EnvError> {
        RequestChannel::write_reward(self, reward)
    }

    fn write_termination(&mut self, termination: Termination) -> Result<(), EnvError> {
        RequestChannel::write_termination(self, termination)
    }
}

/// Interprets instructions and advances the simulation through the rendezvous.
pub struct EpisodeController<S: Simulation> {
    simulation: S,
    rendezvous: Arc<FrameRendezvous>,
    pacer: Option<RealTimePacer>,
    frameskip: u32,
    metrics: EpisodeMetrics,
    has_reset: bool,
    last_termination: Termination,
    total_frames: FrameCount,
    terminated: bool,
}

impl<S: Simulation> EpisodeController<S> {
    /// Controller for `simulation`, gated by `rendezvous`.
    pub fn new(simulation: S, rendezvous: Arc<FrameRendezvous>, config: &EnvConfig) -> Self {
        Self {
            simulation,
            rendezvous,
            pacer: config.real_time.then(|| RealTimePacer::new(config.fps)),
            frameskip: config.frameskip.max(1),
            metrics: EpisodeMetrics::new(config.metrics_every_frames, config.fps),
            has_reset: false,
            last_termination: Termination::NONE,
            total_frames: FrameCount::ZERO,
            terminated: false,
        }
    }

    /// Dispatch one instruction.
    pub fn handle(
        &mut self,
        code: InstructionCode,
        buffers: &mut dyn ResponseBuffers,
    ) -> Result<(), EnvError> {
        match code {
            InstructionCode::ResetNewLife => self.reset(false, buffers),
            InstructionCode::ResetNewGame => self.reset(true, buffers),
            InstructionCode::Step => self.step(buffers),
            InstructionCode::Close => {
                self.close();
                Ok(())
            }
            InstructionCode::Unknown(raw) => {
                debug!(raw, "Ignoring unknown instruction");
                Ok(())
            }
        }
    }

    /// Let the simulation reach its first frame and, optionally, skip the intro.
    pub fn warm_up(&mut self, skip_intro: bool) -> Result<(), EnvError> {
        self.advance_one_frame()?;
        if skip_intro {
            self.simulation.trigger_new_game()?;
            self.advance_one_frame()?;
            self.advance_one_frame()?;
        }
        self.simulation.pull_score_delta();
        self.simulation.pull_terminated_since_last_call();
        debug!(skip_intro, frames = self.total_frames.0, "Simulation warmed up");
        Ok(())
    }

    fn reset(
        &mut self,
        force_new_game: bool,
        buffers: &mut dyn ResponseBuffers,
    ) -> Result<(), EnvError> {
        let started = Instant::now();
        if !self.has_reset {
            info!("First reset, starting a new game");
            self.simulation.trigger_new_game()?;
            self.metrics.initialize();
            self.has_reset = true;
        } else if force_new_game {
            debug!("Reset: new game");
            self.simulation.trigger_new_game()?;
        } else if !self.last_termination.is_done() {
            debug!("Reset: respawn");
            self.simulation.trigger_respawn()?;
        } else {
            debug!("Reset: episode already over, keeping the simulation's own restart");
        }

        self.advance_one_frame()?;
        // The reset frame's own score and death do not belong to the next episode.
        self.simulation.pull_score_delta();
        self.simulation.pull_terminated_since_last_call();
        self.last_termination = Termination::NONE;

        self.write_observation(buffers)?;
        self.metrics.add_server_time(started.elapsed());
        buffers.write_termination(self.last_termination)?;
        buffers.write_info(&self.metrics.snapshot())?;
        Ok(())
    }

    fn step(&mut self, buffers: &mut dyn ResponseBuffers) -> Result<(), EnvError> {
        if !self.has_reset || self.last_termination.is_done() {
            return Err(EnvError::EnvironmentNotReset);
        }

        let inputs = buffers.read_actions()?;
        let started = Instant::now();
        let pacer = self.pacer;
        let mut reward = 0i64;
        let mut frames = 0u32;

        while frames < self.frameskip && !self.last_termination.is_done() {
            reward += match pacer {
                Some(pacer) => pacer.run_paced(|| self.process_frame(inputs))?,
                None => self.process_frame(inputs)?,
            };
            frames += 1;
        }

        self.write_observation(buffers)?;
        self.metrics.add_server_time(started.elapsed());
        buffers.write_reward(reward as f32)?;
        buffers.write_info(&self.metrics.snapshot())?;
        buffers.write_termination(self.last_termination)?;
        debug!(
            frames,
            reward,
            done = self.last_termination.is_done(),
            "Step complete"
        );
        Ok(())
    }

    /// One held-input frame; returns its score delta.
    fn process_frame(&mut self, inputs: InputSet) -> Result<i64, EnvError> {
        self.simulation.set_held_inputs(inputs);
        self.advance_one_frame()?;
        let delta = self.simulation.pull_score_delta();
        let terminated = self.simulation.pull_terminated_since_last_call();
        self.last_termination = Termination::new(terminated, false);
        self.metrics.record_frame();
        Ok(delta)
    }

    fn advance_one_frame(&mut self) -> Result<(), EnvError> {
        let started = Instant::now();
        self.rendezvous.advance_frame()?;
        self.metrics.add_sim_time(started.elapsed());
        self.total_frames = self.total_frames.advance(1);
        Ok(())
    }

    fn write_observation(&mut self, buffers: &mut dyn ResponseBuffers) -> Result<(), EnvError> {
        self.simulation.capture_current_frame(&mut |frame| {
            let expected = frame.format.frame_len()?;
            if frame.pixels.len() != expected {
                return Err(EnvError::Native(format!(
                    "captured {} bytes for a {expected}-byte frame",
                    frame.pixels.len()
                )));
            }
            buffers.write_observation(frame.pixels)
        })
    }

    fn close(&mut self) {
        if self.terminated {
            debug!("Close already requested");
            return;
        }
        info!(frames = self.total_frames.0, "Close requested");
        self.terminated = true;
        self.rendezvous.disable();
    }

    /// Whether CLOSE was processed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Frames advanced since the controller was created.
    pub fn total_frames(&self) -> FrameCount {
        self.total_frames
    }

    /// Frames advanced by STEP requests only.
    pub fn step_frames(&self) -> FrameCount {
        self.metrics.step_frames()
    }

    /// Termination written by the last reset or step.
    pub fn last_termination(&self) -> Termination {
        self.last_termination
    }

    /// Current metrics.
    pub fn info(&self) -> Info {
        self.metrics.snapshot()
    }

    /// The driven simulation.
    pub fn simulation(&self) -> &S {
        &self.simulation
    }
}
