#![warn(missing_docs)]
//! Environment server driving a live simulation one frame at a time.
//!
//! The simulation keeps running on its own thread. Its per-frame update and
//! its time queries are redirected through a [`hooks::HookRegistry`] so the
//! server can freeze it between frames ([`rendezvous::FrameRendezvous`]) and
//! feed it a virtual clock ([`clock::VirtualClock`]). The
//! [`controller::EpisodeController`] turns client instructions into resets
//! and steps, and [`server::EnvServer`] ties everything to the shared-memory
//! channel.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod controller;
pub mod hooks;
pub mod metrics;
pub mod pacer;
pub mod rendezvous;
pub mod server;
pub mod simulation;

pub use clock::VirtualClock;
pub use config::{ConfigError, EnvConfig};
pub use controller::{EpisodeController, ResponseBuffers};
pub use hooks::{EntryPoint, HookId, HookRegistry, HookTarget, Interceptor, LocalInterceptor};
pub use pacer::RealTimePacer;
pub use rendezvous::FrameRendezvous;
pub use server::{EnvServer, ServerSummary};
pub use simulation::{CapturedFrame, FrameFormat, PixelFormat, Simulation};
