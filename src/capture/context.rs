//! Capture context: everything one capture session needs, fixed at creation

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::buffer::Buffer;
use super::session::{frame_trampoline, FrameHandler};
use crate::device::Device;
use crate::driver::{ErrorCode, FrameCallback, Handle, StreamDriver};
use crate::error::{CaptureError, Result};
use crate::utils::LogThrottler;

/// The user handler of a streaming session, behind the dispatch lock
pub(crate) struct HandlerSlot {
    pub(crate) name: &'static str,
    pub(crate) handler: Mutex<Option<Box<dyn FrameHandler>>>,
}

/// Immutable description of one capture session.
///
/// Owns the participating buffers. Slot 0 of every buffer's native context
/// points back at this struct, which is how the completion trampoline finds
/// it; the context therefore must outlive the buffers' registration, which
/// [`CaptureFsm`](super::CaptureFsm) guarantees by unwinding before it drops
/// its reference.
pub struct CaptureContext {
    driver: Arc<dyn StreamDriver>,
    device: Arc<Device>,
    stream: Handle,
    buffers: Vec<Buffer>,
    pub(crate) handler: Option<HandlerSlot>,
    callback: Option<FrameCallback>,
    pub(crate) throttler: LogThrottler,
}

impl CaptureContext {
    /// Build a context. With a handler, completions are delivered through the
    /// native trampoline; without one, buffers must be collected by waiting.
    pub fn new(
        driver: Arc<dyn StreamDriver>,
        device: Arc<Device>,
        stream: Handle,
        buffers: Vec<Buffer>,
        handler: Option<Box<dyn FrameHandler>>,
    ) -> Arc<Self> {
        let callback: Option<FrameCallback> = handler.as_ref().map(|_| frame_trampoline as FrameCallback);
        let handler = handler.map(|handler| HandlerSlot {
            name: handler.name(),
            handler: Mutex::new(Some(handler)),
        });

        Arc::new_cyclic(|weak| {
            let address = weak.as_ptr() as *const c_void;
            for buffer in &buffers {
                buffer.set_context(address);
            }
            Self {
                driver,
                device,
                stream,
                buffers,
                handler,
                callback,
                throttler: LogThrottler::new(Duration::from_secs(5)),
            }
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn stream_handle(&self) -> Handle {
        self.stream
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub(crate) fn driver(&self) -> &dyn StreamDriver {
        self.driver.as_ref()
    }

    /// Whether `buffer` is one of this context's own buffers (by identity)
    pub fn owns(&self, buffer: &Buffer) -> bool {
        self.buffers.iter().any(|b| std::ptr::eq(b, buffer))
    }

    /// Find the buffer whose storage starts at `address`
    pub(crate) fn find_by_storage(&self, address: *mut c_void) -> Option<&Buffer> {
        if address.is_null() {
            return None;
        }
        self.buffers
            .iter()
            .find(|b| b.storage_address() == Some(address as usize))
    }

    /// Hand `buffer` back to the device's ready queue.
    ///
    /// Never takes the dispatch lock, so frame handlers may call it for the
    /// buffer they were just given. Fails with `InvalidArgument` while a view
    /// of the buffer is still alive.
    pub fn queue_frame(&self, buffer: &Buffer) -> Result<()> {
        if !self.owns(buffer) {
            return Err(CaptureError::InvalidArgument(
                "Given buffer is not part of this capture session".to_string(),
            ));
        }
        self.lend(buffer)
    }

    pub(crate) fn lend(&self, buffer: &Buffer) -> Result<()> {
        buffer.lend()?;
        self.driver
            .queue_frame(self.stream, buffer.raw_ptr(), self.callback)
            .map_err(|code| {
                buffer.reclaim();
                self.native_error(code)
            })
    }

    /// Take every buffer back after the device queue was emptied
    pub(crate) fn reclaim_all(&self) {
        for buffer in &self.buffers {
            buffer.reclaim();
        }
    }

    pub(crate) fn native_error(&self, code: ErrorCode) -> CaptureError {
        CaptureError::from_native(self.device.id(), self.stream, code)
    }

    /// Detach the user handler; completions arriving afterwards are ignored.
    /// Waits for an in-flight dispatch to finish.
    pub(crate) fn revoke_handler(&self) {
        if let Some(slot) = &self.handler {
            // dropped after the lock is released, the handler may own stream handles
            let handler = slot.handler.lock().take();
            drop(handler);
        }
    }

    pub(crate) fn wait_timeout_check(timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(CaptureError::InvalidArgument(
                "Timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureContext")
            .field("device", &self.device.id())
            .field("stream", &self.stream)
            .field("buffers", &self.buffers.len())
            .field("handler", &self.handler.as_ref().map(|s| s.name))
            .finish()
    }
}
