//! Background thread playing the role of the simulation's own main loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use pursuit_env::LocalInterceptor;
use tracing::debug;

use crate::stub::ScriptHandle;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Native counter stand-in: microseconds since first use.
pub fn real_counter() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

/// Loop calling the frame update through an interceptor, like a game would.
///
/// Every frame queries the performance counter, so tests can observe what
/// the simulation saw.
pub struct GameThread {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GameThread {
    /// Start looping. Frames only run while the interceptor is enabled.
    pub fn spawn(interceptor: Arc<LocalInterceptor>, script: ScriptHandle) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let paused = Arc::clone(&paused);
            thread::Builder::new()
                .name("pursuit-game".to_owned())
                .spawn(move || game_loop(&interceptor, &script, &stop, &paused))
                .context("spawning game thread")?
        };
        Ok(Self {
            stop,
            paused,
            handle: Some(handle),
        })
    }

    /// Hang inside the next frame update until stopped.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GameThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn game_loop(
    interceptor: &LocalInterceptor,
    script: &ScriptHandle,
    stop: &AtomicBool,
    paused: &AtomicBool,
) {
    debug!("Game loop started");
    while !stop.load(Ordering::SeqCst) {
        if !interceptor.is_enabled() {
            thread::sleep(IDLE_SLEEP);
            continue;
        }
        interceptor.invoke_update(&|| {
            while paused.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                thread::sleep(IDLE_SLEEP);
            }
            let counter = interceptor.query_counter(&real_counter).ok();
            script.run_frame(counter);
        });
    }
    debug!(frames = script.frames(), "Game loop stopped");
}
