//! Single-slot doorbells shared between the two processes.
//!
//! A doorbell is a one-word segment whose value is either 0 (idle) or 1
//! (rung). Ringing sets the slot, waiting consumes it, so the pair of
//! doorbells behaves like two binary semaphores with a maximum count of one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::IpcError;
use crate::names::{Resource, ResourceNames};
use crate::segment::{MapMode, SharedSegment};

const IDLE: u32 = 0;
const RUNG: u32 = 1;

/// Busy polls before falling back to sleeping.
const SPIN_LIMIT: u32 = 2_000;

/// Sleep between polls once spinning gave up.
const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// One shared one-shot signal.
#[derive(Debug)]
pub struct Doorbell {
    segment: SharedSegment,
}

impl Doorbell {
    /// Map the doorbell stored under `resource`.
    pub fn map(names: &ResourceNames, resource: Resource, mode: MapMode) -> Result<Self, IpcError> {
        let segment = SharedSegment::map(names, resource, std::mem::size_of::<AtomicU32>(), mode)?;
        Ok(Self { segment })
    }

    fn slot(&self) -> &AtomicU32 {
        // SAFETY: mappings are page aligned and at least four bytes long, and
        // the slot is only ever accessed atomically by either process.
        unsafe { &*(self.segment.as_ptr() as *const AtomicU32) }
    }

    /// Signal the other side. Fails if the previous ring was never consumed.
    pub fn ring(&self) -> Result<(), IpcError> {
        self.slot()
            .compare_exchange(IDLE, RUNG, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| IpcError::DoorbellSaturated(self.segment.name().to_owned()))
    }

    /// Consume a pending ring without blocking.
    pub fn try_take(&self) -> bool {
        self.slot()
            .compare_exchange(RUNG, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether a ring is pending.
    pub fn is_rung(&self) -> bool {
        self.slot().load(Ordering::Acquire) == RUNG
    }

    /// Block until a ring arrives and consume it; false once `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;
        loop {
            if self.try_take() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
        }
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}
