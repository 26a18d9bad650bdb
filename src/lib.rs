//! framegrab - frame acquisition over a handle-based camera SDK
//!
//! Registers buffers with a device, drives the capture state ladder and
//! delivers frames either synchronously (a frame generator) or through a
//! callback-driven streaming session.

pub mod capture;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod system;
pub mod utils;

pub use capture::{AllocationMode, Buffer, FrameHandler};
pub use device::{Camera, Device, OpenStream, Stream};
pub use error::{CaptureError, Result};
pub use system::{System, SystemGuard};
