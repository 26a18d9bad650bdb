//! Native SDK boundary
//!
//! Everything the capture engine needs from the handle-based device SDK is
//! expressed by the [`StreamDriver`] trait. A binding to a real vendor library
//! implements it over FFI; [`sim::SimulatedDriver`] implements it in-process.

pub mod sim;

use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::buffer::Storage;

/// Opaque native handle (device, stream, ...)
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(pub usize);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Frame descriptor shared with the native side.
///
/// The `buffer` and `image_data` fields are raw addresses into storage owned by
/// a [`Buffer`](crate::capture::Buffer). Never copy this struct to duplicate a
/// frame; see `Buffer::clone`.
#[repr(C)]
#[derive(Debug)]
pub struct RawFrame {
    pub buffer: *mut c_void,
    pub buffer_size: u32,
    pub context: [*mut c_void; 4],
    pub receive_status: i32,
    pub frame_id: u64,
    pub timestamp: u64,
    pub image_data: *mut u8,
    pub receive_flags: u32,
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub payload_type: u32,
    pub chunk_data_present: u8,
}

impl Default for RawFrame {
    fn default() -> Self {
        Self {
            buffer: ptr::null_mut(),
            buffer_size: 0,
            context: [ptr::null_mut(); 4],
            receive_status: 0,
            frame_id: 0,
            timestamp: 0,
            image_data: ptr::null_mut(),
            receive_flags: 0,
            pixel_format: 0,
            width: 0,
            height: 0,
            offset_x: 0,
            offset_y: 0,
            payload_type: 0,
            chunk_data_present: 0,
        }
    }
}

/// Completion callback invoked by the device on its own thread.
///
/// Returns `ErrorCode::Success as i32` when the frame was handled, any other
/// value signals that the user handler failed.
pub type FrameCallback =
    unsafe extern "C" fn(device: Handle, stream: Handle, frame: *mut RawFrame) -> i32;

/// Native status codes
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    #[error("Success")]
    Success = 0,
    #[error("InternalFault")]
    InternalFault = -1,
    #[error("ApiNotStarted")]
    ApiNotStarted = -2,
    #[error("NotFound")]
    NotFound = -3,
    #[error("BadHandle")]
    BadHandle = -4,
    #[error("DeviceNotOpen")]
    DeviceNotOpen = -5,
    #[error("InvalidAccess")]
    InvalidAccess = -6,
    #[error("BadParameter")]
    BadParameter = -7,
    #[error("InvalidValue")]
    InvalidValue = -11,
    #[error("Timeout")]
    Timeout = -12,
    #[error("Other")]
    Other = -13,
    #[error("Resources")]
    Resources = -14,
    #[error("InvalidCall")]
    InvalidCall = -15,
    #[error("NotSupported")]
    NotSupported = -18,
    #[error("Incomplete")]
    Incomplete = -19,
    #[error("IO")]
    Io = -20,
    #[error("Busy")]
    Busy = -24,
    #[error("InUse")]
    InUse = -27,
    #[error("Unknown")]
    Unknown = -28,
    #[error("Already")]
    Already = -33,
    #[error("UserCallbackException")]
    UserCallbackException = -35,
    #[error("InsufficientBufferCount")]
    InsufficientBufferCount = -41,
}

impl ErrorCode {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => ErrorCode::Success,
            -1 => ErrorCode::InternalFault,
            -2 => ErrorCode::ApiNotStarted,
            -3 => ErrorCode::NotFound,
            -4 => ErrorCode::BadHandle,
            -5 => ErrorCode::DeviceNotOpen,
            -6 => ErrorCode::InvalidAccess,
            -7 => ErrorCode::BadParameter,
            -11 => ErrorCode::InvalidValue,
            -12 => ErrorCode::Timeout,
            -13 => ErrorCode::Other,
            -14 => ErrorCode::Resources,
            -15 => ErrorCode::InvalidCall,
            -18 => ErrorCode::NotSupported,
            -19 => ErrorCode::Incomplete,
            -20 => ErrorCode::Io,
            -24 => ErrorCode::Busy,
            -27 => ErrorCode::InUse,
            -33 => ErrorCode::Already,
            -35 => ErrorCode::UserCallbackException,
            -41 => ErrorCode::InsufficientBufferCount,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Result of a native call
pub type DriverResult<T> = std::result::Result<T, ErrorCode>;

/// Device access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    None,
    #[default]
    Full,
    /// Read-only access (e.g. multicast receivers). Acquisition commands are skipped.
    Read,
    Config,
    Exclusive,
}

/// Handles returned when a device is opened
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub handle: Handle,
    pub streams: Vec<Handle>,
}

/// The device SDK as seen by the capture engine.
///
/// Methods take `&self` so implementations can be shared as
/// `Arc<dyn StreamDriver>`; they must use internal mutability.
///
/// Frame pointers passed to `queue_frame` stay valid until the frame is
/// revoked. Implementations may write the frame and its storage from any
/// thread while it is queued.
pub trait StreamDriver: Send + Sync {
    /// Load transport layers and make the API usable
    fn startup(&self) -> DriverResult<()>;
    /// Release the API
    fn shutdown(&self) -> DriverResult<()>;

    fn open_device(&self, id: &str, mode: AccessMode) -> DriverResult<DeviceInfo>;
    fn close_device(&self, device: Handle) -> DriverResult<()>;

    /// Bytes needed to hold one frame of the stream's current configuration
    fn payload_size(&self, stream: Handle) -> DriverResult<u32>;
    /// Optional `StreamBufferAlignment` feature, `None` if the stream lacks it
    fn buffer_alignment(&self, stream: Handle) -> DriverResult<Option<usize>>;
    /// Optional `StreamAnnounceBufferMinimum` feature, `None` if the stream lacks it
    fn min_buffer_count(&self, stream: Handle) -> DriverResult<Option<u32>>;

    /// Register a frame. If `frame.buffer` is null the driver allocates
    /// `frame.buffer_size` bytes, points `frame.buffer` at them and hands the
    /// allocation back.
    fn announce_frame(&self, stream: Handle, frame: *mut RawFrame)
        -> DriverResult<Option<Storage>>;
    fn revoke_frame(&self, stream: Handle, frame: *mut RawFrame) -> DriverResult<()>;

    fn queue_frame(
        &self,
        stream: Handle,
        frame: *mut RawFrame,
        callback: Option<FrameCallback>,
    ) -> DriverResult<()>;
    fn flush_queue(&self, stream: Handle) -> DriverResult<()>;

    fn capture_start(&self, stream: Handle) -> DriverResult<()>;
    fn capture_end(&self, stream: Handle) -> DriverResult<()>;

    /// Execute a named command feature such as `AcquisitionStart`
    fn run_command(&self, device: Handle, name: &str) -> DriverResult<()>;

    /// Block until `frame` has been filled or `timeout` expires
    fn wait_frame(&self, stream: Handle, frame: *mut RawFrame, timeout: Duration)
        -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip_known_values() {
        for code in [
            ErrorCode::Success,
            ErrorCode::BadHandle,
            ErrorCode::Timeout,
            ErrorCode::InUse,
            ErrorCode::InsufficientBufferCount,
        ] {
            assert_eq!(ErrorCode::from_raw(code.as_raw()), code);
        }
        assert_eq!(ErrorCode::from_raw(-999), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_raw(1), ErrorCode::Unknown);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(Handle(0x2a).to_string(), "0x2a");
        assert!(Handle::NULL.is_null());
    }

    #[test]
    fn test_raw_frame_default_is_empty() {
        let frame = RawFrame::default();
        assert!(frame.buffer.is_null());
        assert!(frame.image_data.is_null());
        assert!(frame.context.iter().all(|c| c.is_null()));
    }
}
