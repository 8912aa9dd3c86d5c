//! Two-phase frame handshake between the server and the simulation thread.
//!
//! The server releases `advance_permit`, the simulation thread runs exactly
//! one update and releases `frame_done`, and the server waits for that with
//! the game timeout. While the rendezvous is enabled the simulation thread
//! cannot run an update without a permit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pursuit_core::EnvError;
use tracing::{debug, trace};

use crate::clock::VirtualClock;

/// How often a parked simulation thread rechecks the enabled flag.
const PERMIT_POLL: Duration = Duration::from_millis(5);

/// Semaphore with a maximum count of one.
#[derive(Debug, Default)]
pub struct BinarySemaphore {
    available: Mutex<bool>,
    signal: Condvar,
}

impl BinarySemaphore {
    /// Empty semaphore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the slot available. Returns false if it already was.
    pub fn release(&self) -> bool {
        let mut available = self.available.lock();
        let was_empty = !*available;
        *available = true;
        self.signal.notify_one();
        was_empty
    }

    /// Take the slot, waiting up to `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut available = self.available.lock();
        while !*available {
            if self.signal.wait_until(&mut available, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *available, false)
    }

    /// Take the slot if it is available.
    pub fn try_acquire(&self) -> bool {
        std::mem::replace(&mut *self.available.lock(), false)
    }
}

/// Frame handshake shared by the server and the simulation thread.
#[derive(Debug)]
pub struct FrameRendezvous {
    clock: Arc<VirtualClock>,
    advance_permit: BinarySemaphore,
    frame_done: BinarySemaphore,
    enabled: AtomicBool,
    game_timeout: Duration,
    completed_frames: AtomicU64,
}

impl FrameRendezvous {
    /// Enabled rendezvous advancing `clock` once per frame.
    pub fn new(clock: Arc<VirtualClock>, game_timeout: Duration) -> Self {
        Self {
            clock,
            advance_permit: BinarySemaphore::new(),
            frame_done: BinarySemaphore::new(),
            enabled: AtomicBool::new(true),
            game_timeout,
            completed_frames: AtomicU64::new(0),
        }
    }

    /// Server side: let the simulation run one frame and wait until it has.
    pub fn advance_frame(&self) -> Result<(), EnvError> {
        if !self.is_enabled() {
            return Err(EnvError::Native(
                "frame rendezvous is disabled".to_owned(),
            ));
        }
        let ticks = self.clock.advance_one_tick();
        self.advance_permit.release();
        trace!(?ticks, "Frame permitted");

        if self.frame_done.acquire_timeout(self.game_timeout) {
            Ok(())
        } else {
            Err(EnvError::GameTimeout(self.game_timeout))
        }
    }

    /// Simulation side: wrap one invocation of the native update.
    ///
    /// While enabled, blocks until the server grants a permit, runs `update`
    /// and confirms the frame. Once disabled, runs `update` straight away.
    pub fn run_simulation_frame(&self, update: &dyn Fn()) {
        if !self.wait_for_permit() {
            update();
            return;
        }
        update();
        self.completed_frames.fetch_add(1, Ordering::AcqRel);
        self.frame_done.release();
    }

    fn wait_for_permit(&self) -> bool {
        while self.is_enabled() {
            if self.advance_permit.acquire_timeout(PERMIT_POLL) {
                return self.is_enabled();
            }
        }
        false
    }

    /// Stop gating the simulation and free any thread parked on a permit.
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            debug!("Frame rendezvous disabled");
        }
        self.advance_permit.release();
    }

    /// Whether updates are gated.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Frames confirmed by the simulation thread so far.
    pub fn completed_frames(&self) -> u64 {
        self.completed_frames.load(Ordering::Acquire)
    }

    /// Clock advanced by this rendezvous.
    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }
}
