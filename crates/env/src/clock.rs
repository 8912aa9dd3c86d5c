//! Virtual time source handed to the simulation.
//!
//! In virtual mode the simulation's frequency and counter queries are
//! answered from a tick counter that only moves when the server advances a
//! frame, so rate-dependent logic inside the simulation sees exactly one
//! frame period per frame however fast the server steps it.

use parking_lot::Mutex;
use pursuit_core::EnvError;

use crate::config::EnvConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockMode {
    Virtual {
        frequency: i64,
        ticks_per_frame: i64,
    },
    RealTime,
}

#[derive(Debug, Default)]
struct CounterState {
    ticks: i64,
    seeded: bool,
}

/// Server-controlled substitute for the simulation's performance counter.
#[derive(Debug)]
pub struct VirtualClock {
    mode: ClockMode,
    state: Mutex<CounterState>,
}

impl VirtualClock {
    /// Virtual clock ticking `frequency` per second at `fps` frames per second.
    pub fn new_virtual(frequency: i64, fps: f32) -> Self {
        let ticks_per_frame = (frequency as f64 / f64::from(fps)).ceil() as i64;
        Self {
            mode: ClockMode::Virtual {
                frequency,
                ticks_per_frame,
            },
            state: Mutex::new(CounterState::default()),
        }
    }

    /// Inert clock: the simulation keeps its own time source.
    pub fn real_time() -> Self {
        Self {
            mode: ClockMode::RealTime,
            state: Mutex::new(CounterState::default()),
        }
    }

    /// Clock matching `config.real_time`.
    pub fn from_config(config: &EnvConfig) -> Self {
        if config.real_time {
            Self::real_time()
        } else {
            Self::new_virtual(config.counter_frequency, config.fps)
        }
    }

    /// Whether time queries should be redirected here.
    pub fn is_virtual(&self) -> bool {
        matches!(self.mode, ClockMode::Virtual { .. })
    }

    /// Counter increment per frame; zero in real-time mode.
    pub fn ticks_per_frame(&self) -> i64 {
        match self.mode {
            ClockMode::Virtual {
                ticks_per_frame, ..
            } => ticks_per_frame,
            ClockMode::RealTime => 0,
        }
    }

    /// Move the counter forward by one frame and return the new value.
    ///
    /// Does nothing and returns `None` in real-time mode.
    pub fn advance_one_tick(&self) -> Option<i64> {
        let ClockMode::Virtual {
            ticks_per_frame, ..
        } = self.mode
        else {
            return None;
        };
        let mut state = self.state.lock();
        state.ticks += ticks_per_frame;
        Some(state.ticks)
    }

    /// Answer a frequency query.
    pub fn query_frequency(&self) -> Result<i64, EnvError> {
        match self.mode {
            ClockMode::Virtual { frequency, .. } => Ok(frequency),
            ClockMode::RealTime => Err(real_time_query("frequency")),
        }
    }

    /// Answer a counter query.
    ///
    /// The first query adds the real counter, read through `real_counter`, so
    /// the simulation keeps seeing values near the ones it saw before.
    pub fn query_counter(&self, real_counter: &dyn Fn() -> i64) -> Result<i64, EnvError> {
        if !self.is_virtual() {
            return Err(real_time_query("counter"));
        }
        let mut state = self.state.lock();
        if !state.seeded {
            state.ticks += real_counter();
            state.seeded = true;
        }
        Ok(state.ticks)
    }
}

fn real_time_query(what: &str) -> EnvError {
    EnvError::Native(format!(
        "virtual {what} queried while the simulation runs in real time"
    ))
}
