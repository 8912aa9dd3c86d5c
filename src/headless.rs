//! Synthetic road simulation served by the headless host.
//!
//! The road runs its own frame loop on a separate thread and calls its update
//! and time queries through a [`LocalInterceptor`], exactly where a native
//! game would call the hooked functions.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use pursuit_core::{EnvError, Input, InputSet};
use pursuit_env::simulation::FrameSink;
use pursuit_env::{CapturedFrame, FrameFormat, LocalInterceptor, PixelFormat, Simulation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::HeadlessConfig;

const MAX_SPEED: f32 = 60.0;
const ACCELERATION: f32 = 30.0;
const BRAKING: f32 = 90.0;
const DRAG: f32 = 6.0;
const STEER_RATE: f32 = 1.5;
/// Longest frame the road integrates; stalls beyond this are not caught up.
const MAX_DT: f64 = 0.1;

const SKY: [u8; 3] = [40, 60, 90];
const GRASS: [u8; 3] = [40, 120, 50];
const ROAD: [u8; 3] = [90, 90, 90];
const STRIPE: [u8; 3] = [230, 230, 230];
const CAR: [u8; 3] = [200, 30, 30];

struct Road {
    width: u32,
    height: u32,
    rng: StdRng,
    crash_rate: f64,
    held: InputSet,
    speed: f32,
    lane: f32,
    distance: f64,
    pending_score: i64,
    crashed: bool,
    last_counter: Option<i64>,
    pixels: Vec<u8>,
}

impl Road {
    fn restart(&mut self) {
        self.respawn();
        self.distance = 0.0;
    }

    fn respawn(&mut self) {
        self.speed = 0.0;
        self.lane = 0.0;
        self.pending_score = 0;
        self.crashed = false;
    }

    fn update(&mut self, counter: i64, frequency: i64) {
        let dt = match self.last_counter {
            Some(last) if frequency > 0 => {
                ((counter - last) as f64 / frequency as f64).clamp(0.0, MAX_DT)
            }
            _ => 0.0,
        };
        self.last_counter = Some(counter);
        let dt_f32 = dt as f32;

        if self.held.is_held(Input::Accelerate) {
            self.speed = (self.speed + ACCELERATION * dt_f32).min(MAX_SPEED);
        } else if self.held.is_held(Input::Brake) {
            self.speed = (self.speed - BRAKING * dt_f32).max(0.0);
        } else {
            self.speed = (self.speed - DRAG * dt_f32).max(0.0);
        }

        let steering = match (
            self.held.is_held(Input::SteerLeft),
            self.held.is_held(Input::SteerRight),
        ) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        };
        self.lane = (self.lane + steering * STEER_RATE * dt_f32).clamp(-1.0, 1.0);

        let before = self.distance;
        self.distance += f64::from(self.speed) * dt;
        if self.held.is_held(Input::Accelerate) {
            self.pending_score += (self.distance.floor() - before.floor()) as i64;
        }

        if steering != 0.0 && self.speed > 0.0 {
            let chance = (self.crash_rate * dt).clamp(0.0, 1.0);
            if chance > 0.0 && self.rng.gen_bool(chance) {
                debug!(distance = self.distance, "Road crash");
                self.crashed = true;
                self.speed = 0.0;
            }
        }

        self.render();
    }

    fn render(&mut self) {
        let width = self.width as usize;
        let height = self.height as usize;
        let horizon = height / 3;
        let car_x = (width as f32 * (0.5 + self.lane * 0.3)) as usize;
        let car_half = (width / 16).max(1);
        let car_top = height.saturating_sub((height / 8).max(1) + 1);
        let scroll = self.distance as usize;

        for y in 0..height {
            let depth = if y < horizon {
                0.0
            } else {
                (y - horizon + 1) as f32 / (height - horizon) as f32
            };
            let half_road = (width as f32 * 0.1 + width as f32 * 0.35 * depth) as usize;
            let center = width / 2;
            for x in 0..width {
                let colour = if y < horizon {
                    SKY
                } else if y >= car_top && x.abs_diff(car_x) <= car_half {
                    CAR
                } else if x.abs_diff(center) <= half_road {
                    if x == center && (y + scroll) % 8 < 4 {
                        STRIPE
                    } else {
                        ROAD
                    }
                } else {
                    GRASS
                };
                let offset = (y * width + x) * 4;
                // X8R8G8B8 is stored little-endian: blue, green, red, unused.
                self.pixels[offset..offset + 4]
                    .copy_from_slice(&[colour[2], colour[1], colour[0], 0xFF]);
            }
        }
    }
}

/// Controller-side handle on the road.
pub struct HeadlessSimulation {
    road: Arc<Mutex<Road>>,
    format: FrameFormat,
}

impl HeadlessSimulation {
    pub fn new(config: &HeadlessConfig) -> Self {
        let format = FrameFormat {
            width: config.width.max(1),
            height: config.height.max(1),
            pixel_format: PixelFormat::X8R8G8B8,
        };
        let len = format.width as usize * format.height as usize * 4;
        let road = Road {
            width: format.width,
            height: format.height,
            rng: StdRng::seed_from_u64(config.seed),
            crash_rate: config.crash_rate,
            held: InputSet::empty(),
            speed: 0.0,
            lane: 0.0,
            distance: 0.0,
            pending_score: 0,
            crashed: false,
            last_counter: None,
            pixels: vec![0; len],
        };
        Self {
            road: Arc::new(Mutex::new(road)),
            format,
        }
    }

    /// Start the road's own frame loop, calling through `interceptor`.
    pub fn spawn_loop(&self, interceptor: Arc<LocalInterceptor>) -> Result<RoadLoop> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let road = Arc::clone(&self.road);
            thread::Builder::new()
                .name("pursuit-road".to_owned())
                .spawn(move || run_loop(&interceptor, &road, &stop))
                .context("spawning road thread")?
        };
        Ok(RoadLoop {
            stop,
            handle: Some(handle),
        })
    }
}

impl Simulation for HeadlessSimulation {
    fn trigger_new_game(&mut self) -> Result<(), EnvError> {
        self.road.lock().restart();
        Ok(())
    }

    fn trigger_respawn(&mut self) -> Result<(), EnvError> {
        self.road.lock().respawn();
        Ok(())
    }

    fn pull_terminated_since_last_call(&mut self) -> bool {
        mem::take(&mut self.road.lock().crashed)
    }

    fn set_held_inputs(&mut self, inputs: InputSet) {
        self.road.lock().held = inputs;
    }

    fn pull_score_delta(&mut self) -> i64 {
        mem::take(&mut self.road.lock().pending_score)
    }

    fn frame_format(&self) -> Result<FrameFormat, EnvError> {
        Ok(self.format)
    }

    fn capture_current_frame(&mut self, sink: &mut FrameSink<'_>) -> Result<(), EnvError> {
        let road = self.road.lock();
        sink(CapturedFrame {
            format: self.format,
            pixels: &road.pixels,
        })
    }

    fn input_channel_count(&self) -> u32 {
        Input::COUNT as u32
    }
}

/// Running road thread. Stopped explicitly or when dropped.
pub struct RoadLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RoadLoop {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Road thread panicked");
            }
        }
    }
}

impl Drop for RoadLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn real_counter() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

fn real_frequency() -> i64 {
    1_000_000
}

fn run_loop(interceptor: &LocalInterceptor, road: &Mutex<Road>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        if !interceptor.is_enabled() {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        interceptor.invoke_update(&|| {
            let frequency = interceptor
                .query_frequency(&real_frequency)
                .unwrap_or_else(|_| real_frequency());
            let counter = interceptor
                .query_counter(&real_counter)
                .unwrap_or_else(|_| real_counter());
            road.lock().update(counter, frequency);
        });
    }
}
