//! Callback-driven streaming
//!
//! The device completes frames on its own thread and calls
//! [`frame_trampoline`], which finds the owning [`CaptureContext`] through the
//! frame's context slot and hands the matching [`Buffer`] to the user's
//! [`FrameHandler`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, info, trace, warn};

use super::buffer::Buffer;
use super::context::CaptureContext;
use super::fsm::CaptureFsm;
use crate::device::Device;
use crate::driver::{ErrorCode, Handle, RawFrame};
use crate::error::{CaptureError, Result};
use crate::warn_throttled;

/// Receives completed frames of a streaming session.
///
/// Runs on the device's completion thread. The buffer is only valid for the
/// duration of the call: copy it (`Buffer::clone`) to keep the data, and hand
/// it back with [`CaptureContext::queue_frame`] so the device can fill it again.
///
/// Must not stop the stream it is attached to.
pub trait FrameHandler: Send {
    fn on_frame(
        &mut self,
        device: &Device,
        stream: &CaptureContext,
        buffer: &Buffer,
    ) -> anyhow::Result<()>;

    /// Name used in logs and errors
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> FrameHandler for F
where
    F: FnMut(&Device, &CaptureContext, &Buffer) -> anyhow::Result<()> + Send,
{
    fn on_frame(
        &mut self,
        device: &Device,
        stream: &CaptureContext,
        buffer: &Buffer,
    ) -> anyhow::Result<()> {
        self(device, stream, buffer)
    }
}

/// Native completion callback registered with every queued buffer.
///
/// # Safety
/// `frame` must be a frame queued by a [`CaptureContext`], whose context slot 0
/// still points at that live context.
pub(crate) unsafe extern "C" fn frame_trampoline(
    device: Handle,
    stream: Handle,
    frame: *mut RawFrame,
) -> i32 {
    if frame.is_null() {
        return ErrorCode::BadParameter.as_raw();
    }
    let context = (*frame).context[0] as *const CaptureContext;
    if context.is_null() {
        return ErrorCode::BadParameter.as_raw();
    }
    trace!("Frame completed on device {} stream {}", device, stream);
    let context = &*context;

    match catch_unwind(AssertUnwindSafe(|| context.dispatch(frame))) {
        Ok(Ok(())) => ErrorCode::Success.as_raw(),
        Ok(Err(_)) => ErrorCode::UserCallbackException.as_raw(),
        Err(_) => {
            error!(
                "Frame handler panicked on device {}",
                context.device().id()
            );
            ErrorCode::UserCallbackException.as_raw()
        }
    }
}

impl CaptureContext {
    /// Route one completed native frame to the user handler.
    ///
    /// Holds the dispatch lock for the whole call so the handler cannot be
    /// revoked while it runs.
    pub(crate) fn dispatch(&self, frame: *mut RawFrame) -> Result<()> {
        let Some(slot) = &self.handler else {
            return Ok(());
        };
        let mut guard = slot.handler.lock();
        let Some(handler) = guard.as_mut() else {
            trace!("Dropping completion that arrived after the session stopped");
            return Ok(());
        };

        // Safety: the trampoline only forwards non-null frames.
        let storage = unsafe { (*frame).buffer };
        let Some(buffer) = self.find_by_storage(storage) else {
            warn_throttled!(
                self.throttler,
                "unmatched_completion",
                "Completed frame {:p} does not belong to the session of device {}",
                storage,
                self.device().id()
            );
            return Ok(());
        };
        buffer.reclaim();

        handler
            .on_frame(self.device(), self, buffer)
            .map_err(|source| {
                error!(
                    "Caught error in frame handler '{}' on device {}: {:#}",
                    slot.name,
                    self.device().id(),
                    source
                );
                CaptureError::Handler {
                    handler: slot.name,
                    source,
                }
            })
    }
}

/// A running callback-driven capture
pub struct StreamingSession {
    fsm: CaptureFsm,
}

impl StreamingSession {
    /// Bring `context` up to `Acquiring`. On failure the ladder is unwound
    /// before the original error is returned.
    pub(crate) fn start(context: Arc<CaptureContext>) -> Result<Self> {
        let mut fsm = CaptureFsm::new(context);
        if let Err(err) = fsm.enter_capturing_mode() {
            if let Err(cleanup) = fsm.leave_capturing_mode() {
                warn!("Cleanup after failed stream start also failed: {}", cleanup);
            }
            return Err(err);
        }
        info!(
            "Streaming started on device {} with {} buffers",
            fsm.context().device().id(),
            fsm.context().buffers().len()
        );
        Ok(Self { fsm })
    }

    /// Detach the handler, then unwind the ladder completely
    pub(crate) fn stop(mut self) -> Result<()> {
        self.fsm.context().revoke_handler();
        self.fsm.leave_capturing_mode()
    }

    pub fn context(&self) -> &Arc<CaptureContext> {
        self.fsm.context()
    }

    /// Requeue one of the session's buffers
    pub fn queue_frame(&self, buffer: &Buffer) -> Result<()> {
        self.fsm.acquiring()?.queue_buffer(buffer)
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        // the ladder itself is unwound by the fsm
        self.fsm.context().revoke_handler();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use crate::capture::buffer::AllocationMode;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::driver::{AccessMode, StreamDriver};

    fn context_with(
        driver: &Arc<SimulatedDriver>,
        count: usize,
        handler: Box<dyn FrameHandler>,
    ) -> Arc<CaptureContext> {
        let info = driver.open_device("DEV_SIM", AccessMode::Full).unwrap();
        let device = Arc::new(Device::new("DEV_SIM", info.handle, AccessMode::Full));
        let size = driver.config().payload_size() as usize;
        let buffers = (0..count)
            .map(|_| Buffer::new(size, AllocationMode::SelfOwned, 1).unwrap())
            .collect();
        CaptureContext::new(driver.clone(), device, info.streams[0], buffers, Some(handler))
    }

    fn wait_until(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_handler_receives_and_requeues() {
        let driver = Arc::new(SimulatedDriver::new(SimConfig::default()));
        driver.startup().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = move |_: &Device, stream: &CaptureContext, buffer: &Buffer| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            stream.queue_frame(buffer)?;
            Ok(())
        };

        let session = StreamingSession::start(context_with(&driver, 2, Box::new(handler))).unwrap();
        wait_until(|| seen.load(Ordering::SeqCst) >= 5);
        session.stop().unwrap();

        assert_eq!(driver.callback_failures(), 0);
        assert_eq!(driver.announced_count(), 0);
        assert!(!driver.is_capturing());
    }

    #[test]
    fn test_handler_error_is_reported_to_device() {
        let driver = Arc::new(SimulatedDriver::new(SimConfig::default()));
        driver.startup().unwrap();
        let handler = |_: &Device, _: &CaptureContext, _: &Buffer| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        };

        let session = StreamingSession::start(context_with(&driver, 1, Box::new(handler))).unwrap();
        wait_until(|| driver.callback_failures() >= 1);
        session.stop().unwrap();
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let driver = Arc::new(SimulatedDriver::new(SimConfig::default()));
        driver.startup().unwrap();
        let handler = |_: &Device, _: &CaptureContext, _: &Buffer| -> anyhow::Result<()> {
            panic!("handler exploded")
        };

        let session = StreamingSession::start(context_with(&driver, 1, Box::new(handler))).unwrap();
        wait_until(|| driver.callback_failures() >= 1);
        session.stop().unwrap();
    }

    #[test]
    fn test_foreign_buffer_is_rejected() {
        let driver = Arc::new(SimulatedDriver::new(SimConfig {
            deliver_frames: false,
            ..SimConfig::default()
        }));
        driver.startup().unwrap();
        let handler = |_: &Device, _: &CaptureContext, _: &Buffer| -> anyhow::Result<()> { Ok(()) };
        let session = StreamingSession::start(context_with(&driver, 1, Box::new(handler))).unwrap();

        let foreign = Buffer::new(16, AllocationMode::SelfOwned, 1).unwrap();
        assert!(matches!(
            session.queue_frame(&foreign),
            Err(CaptureError::InvalidArgument(_))
        ));
        session.stop().unwrap();
    }

    #[test]
    fn test_live_view_blocks_requeue() {
        let driver = Arc::new(SimulatedDriver::new(SimConfig::default()));
        driver.startup().unwrap();
        let refused = Arc::new(AtomicUsize::new(0));
        let counter = refused.clone();
        let handler = move |_: &Device, ctx: &CaptureContext, buffer: &Buffer| -> anyhow::Result<()> {
            let view = buffer
                .as_view()
                .ok_or_else(|| anyhow::anyhow!("delivered buffer has no view"))?;
            if matches!(ctx.queue_frame(buffer), Err(CaptureError::InvalidArgument(_))) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            drop(view);
            ctx.queue_frame(buffer)?;
            Ok(())
        };

        let session = StreamingSession::start(context_with(&driver, 1, Box::new(handler))).unwrap();
        wait_until(|| refused.load(Ordering::SeqCst) >= 3);
        session.stop().unwrap();
        assert_eq!(driver.callback_failures(), 0);
    }

    #[test]
    fn test_queued_buffer_has_no_view() {
        let driver = Arc::new(SimulatedDriver::new(SimConfig {
            deliver_frames: false,
            ..SimConfig::default()
        }));
        driver.startup().unwrap();
        let handler = |_: &Device, _: &CaptureContext, _: &Buffer| -> anyhow::Result<()> { Ok(()) };
        let session = StreamingSession::start(context_with(&driver, 2, Box::new(handler))).unwrap();

        let buffer = &session.context().buffers()[0];
        assert!(buffer.is_queued());
        assert!(buffer.as_view().is_none());

        let context = session.context().clone();
        session.stop().unwrap();
        assert!(!context.buffers()[0].is_queued());
        assert!(context.buffers()[0].as_view().is_some());
    }

    #[test]
    fn test_failed_start_unwinds() {
        let driver = Arc::new(SimulatedDriver::new(SimConfig::default()));
        driver.startup().unwrap();
        driver.fail_next(crate::driver::sim::SimOp::Command, ErrorCode::Io);
        let handler = |_: &Device, _: &CaptureContext, _: &Buffer| -> anyhow::Result<()> { Ok(()) };

        let result = StreamingSession::start(context_with(&driver, 3, Box::new(handler)));
        assert!(result.is_err());
        assert_eq!(driver.announced_count(), 0);
        assert!(!driver.is_capturing());
    }
}
