//! Capture engine
//!
//! Buffers, the state ladder that registers and queues them, and the two
//! acquisition styles built on it: a pull-based [`FrameGenerator`] and a
//! callback-driven [`StreamingSession`].

pub mod buffer;
pub mod channel;
pub mod context;
pub mod format;
pub mod fsm;
pub mod generator;
pub mod session;

pub use buffer::{AllocationMode, Buffer, BufferView, FrameFlags, FrameStatus, Storage};
pub use channel::{frame_channel, ChannelHandler};
pub use context::CaptureContext;
pub use format::{PayloadType, PixelFormat};
pub use fsm::{Acquiring, CaptureFsm, CaptureState};
pub use generator::FrameGenerator;
pub use session::{FrameHandler, StreamingSession};
