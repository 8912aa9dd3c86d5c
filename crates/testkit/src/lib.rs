#![warn(missing_docs)]
//! Test fixtures for the environment server.
//!
//! [`ScriptedSimulation`] stands in for the game, [`GameThread`] drives its
//! frame updates through the interception layer, and [`EnvHarness`] wires a
//! server and a client together over resources in a temporary directory.

mod game_thread;
mod harness;
mod stub;

pub use game_thread::{real_counter, GameThread};
pub use harness::{test_config, EnvHarness, RecordingBuffers, TEST_PREFIX};
pub use stub::{FrameEvent, ScriptHandle, ScriptedSimulation};
