#![warn(missing_docs)]
//! Shared-memory transport between the environment server and its client.
//!
//! Every resource is a named file mapped into both processes. Two one-word
//! doorbells pass the turn back and forth so the buffers never need locks:
//! the client writes, rings the request doorbell and waits; the server
//! consumes it, answers, and rings the response doorbell.

pub mod buffers;
pub mod channel;
pub mod client;
pub mod doorbell;
pub mod error;
pub mod names;
pub mod segment;

pub use buffers::{DataBuffers, Doorbells, HandshakeBuffers};
pub use channel::{ChannelConfig, RequestChannel};
pub use client::{ClientConfig, ClientError, EnvClient, StepOutcome};
pub use doorbell::Doorbell;
pub use error::IpcError;
pub use names::{default_shm_dir, Resource, ResourceNames};
pub use segment::{MapMode, PodSegment, SharedSegment};
