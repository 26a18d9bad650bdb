use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::Device;
use crate::capture::{
    AllocationMode, Buffer, CaptureContext, CaptureFsm, FrameGenerator, FrameHandler,
    StreamingSession,
};
use crate::driver::{Handle, StreamDriver};
use crate::error::{CaptureError, Result};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
enum SlotState {
    #[default]
    Idle,
    Running {
        /// id of the `OpenStream` that started the session
        owner: u64,
        session: StreamingSession,
    },
    /// Torn down outside the lock; starts are refused until it is done
    Stopping,
}

/// Streaming state of one native stream, shared by every handle to it
#[derive(Default)]
pub(crate) struct StreamSlot {
    state: Mutex<SlotState>,
    streaming: AtomicBool,
}

impl StreamSlot {
    fn has_session(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Tear down the running session, if any. With `owner` set, only a
    /// session started by that handle is stopped.
    ///
    /// The session is unwound without holding the slot lock, so handlers may
    /// keep using stream handles while the stop waits for them.
    pub(crate) fn stop(&self, device: &Device, owner: Option<u64>) -> Result<()> {
        let session = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, SlotState::Stopping) {
                SlotState::Running { owner: started_by, session }
                    if owner.map_or(true, |id| id == started_by) =>
                {
                    session
                }
                other => {
                    *state = other;
                    return Ok(());
                }
            }
        };

        let result = session.stop();
        self.streaming.store(false, Ordering::Release);
        *self.state.lock() = SlotState::Idle;
        match &result {
            Ok(()) => info!("Streaming stopped on device {}", device.id()),
            Err(err) => warn!(
                "Streaming on device {} stopped with errors: {}",
                device.id(),
                err
            ),
        }
        result
    }

    fn context(&self) -> Option<Arc<CaptureContext>> {
        match &*self.state.lock() {
            SlotState::Running { session, .. } => Some(session.context().clone()),
            _ => None,
        }
    }
}

/// A stream that is not open for capture
pub struct Stream {
    driver: Arc<dyn StreamDriver>,
    device: Arc<Device>,
    handle: Handle,
    slot: Arc<StreamSlot>,
}

impl Stream {
    pub(crate) fn new(
        driver: Arc<dyn StreamDriver>,
        device: Arc<Device>,
        handle: Handle,
        slot: Arc<StreamSlot>,
    ) -> Self {
        Self {
            driver,
            device,
            handle,
            slot,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn open(self) -> OpenStream {
        debug!("Opening stream {} of device {}", self.handle, self.device.id());
        OpenStream {
            inner: self,
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// A stream ready for frame acquisition.
///
/// Supports two mutually exclusive styles: pulling frames synchronously
/// ([`get_frame`](Self::get_frame), [`get_frame_generator`](Self::get_frame_generator))
/// or pushing them to a handler ([`start_streaming`](Self::start_streaming)).
///
/// Several handles may be open on the same stream. Any of them can stop a
/// running session, but dropping a handle only stops the session it started.
pub struct OpenStream {
    inner: Stream,
    id: u64,
}

impl OpenStream {
    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.inner.device
    }

    /// Stop streaming and return the closed stream
    pub fn close(self) -> Result<Stream> {
        self.stop_streaming()?;
        let Stream {
            driver,
            device,
            handle,
            slot,
        } = &self.inner;
        Ok(Stream::new(driver.clone(), device.clone(), *handle, slot.clone()))
    }

    /// Whether a streaming session is running. Always false once the device
    /// has been marked disconnected.
    pub fn is_streaming(&self) -> bool {
        !self.inner.device.is_disconnected() && self.inner.slot.has_session()
    }

    fn frame_layout(&self) -> Result<(usize, usize)> {
        let Stream {
            driver,
            device,
            handle,
            ..
        } = &self.inner;
        let native = |code| CaptureError::from_native(device.id(), *handle, code);
        let payload = driver.payload_size(*handle).map_err(native)? as usize;
        let alignment = driver.buffer_alignment(*handle).map_err(native)?.unwrap_or(1);
        Ok((payload, alignment))
    }

    fn context(
        &self,
        count: usize,
        mode: AllocationMode,
        handler: Option<Box<dyn FrameHandler>>,
    ) -> Result<Arc<CaptureContext>> {
        let (payload, alignment) = self.frame_layout()?;
        let buffers = (0..count)
            .map(|_| Buffer::new(payload, mode, alignment))
            .collect::<Result<Vec<_>>>()?;
        Ok(CaptureContext::new(
            self.inner.driver.clone(),
            self.inner.device.clone(),
            self.inner.handle,
            buffers,
            handler,
        ))
    }

    fn already_streaming(&self) -> CaptureError {
        CaptureError::AlreadyStreaming {
            device: self.inner.device.id().to_string(),
        }
    }

    /// Lazily capture up to `limit` frames (unbounded if `None`), each waited
    /// for at most `timeout`.
    ///
    /// Arguments are checked before any native work is done.
    pub fn get_frame_generator(
        &self,
        limit: Option<u64>,
        timeout: Duration,
        allocation_mode: AllocationMode,
    ) -> Result<FrameGenerator<'_>> {
        if limit == Some(0) {
            return Err(CaptureError::InvalidArgument(
                "Frame limit must be greater than zero".to_string(),
            ));
        }
        CaptureContext::wait_timeout_check(timeout)?;
        // a session on a disconnected device still owns the stream
        if self.inner.slot.has_session() {
            return Err(self.already_streaming());
        }

        let context = self.context(1, allocation_mode, None)?;
        Ok(FrameGenerator::new(CaptureFsm::new(context), limit, timeout))
    }

    /// Capture exactly one frame
    pub fn get_frame(&self, timeout: Duration, allocation_mode: AllocationMode) -> Result<Buffer> {
        let mut frames = self.get_frame_generator(Some(1), timeout, allocation_mode)?;
        let frame = match frames.next() {
            Some(frame) => frame?,
            None => {
                return Err(CaptureError::InvalidArgument(
                    "Frame generator ended without a frame".to_string(),
                ))
            }
        };
        if let Err(err) = frames.close() {
            warn!(
                "Teardown after single frame on device {} failed: {}",
                self.inner.device.id(),
                err
            );
        }
        Ok(frame)
    }

    /// Start delivering frames to `handler` on the device's thread.
    ///
    /// `buffer_count` buffers are cycled; if the stream demands more, its
    /// minimum is used instead.
    pub fn start_streaming<H>(
        &self,
        handler: H,
        buffer_count: u32,
        allocation_mode: AllocationMode,
    ) -> Result<()>
    where
        H: FrameHandler + 'static,
    {
        if buffer_count == 0 {
            return Err(CaptureError::InvalidArgument(
                "buffer_count must be greater than zero".to_string(),
            ));
        }
        let Stream {
            driver,
            device,
            handle,
            slot,
        } = &self.inner;

        let mut state = slot.state.lock();
        if !matches!(*state, SlotState::Idle) {
            return Err(self.already_streaming());
        }

        let minimum = driver
            .min_buffer_count(*handle)
            .map_err(|code| CaptureError::from_native(device.id(), *handle, code))?;
        let count = match minimum {
            Some(minimum) if minimum > buffer_count => {
                info!(
                    "Device {} requires at least {} buffers, using {} instead of {}",
                    device.id(),
                    minimum,
                    minimum,
                    buffer_count
                );
                minimum
            }
            _ => buffer_count,
        };

        let context = self.context(count as usize, allocation_mode, Some(Box::new(handler)))?;
        *state = SlotState::Running {
            owner: self.id,
            session: StreamingSession::start(context)?,
        };
        slot.streaming.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the running streaming session. Does nothing if none is running.
    pub fn stop_streaming(&self) -> Result<()> {
        self.inner.slot.stop(&self.inner.device, None)
    }

    /// Hand a buffer back to the running session. Does nothing if no session
    /// is running.
    pub fn queue_frame(&self, buffer: &Buffer) -> Result<()> {
        match self.inner.slot.context() {
            Some(context) => context.queue_frame(buffer),
            None => Ok(()),
        }
    }

    /// Buffers of the running session
    pub fn session_buffers(&self) -> usize {
        self.inner
            .slot
            .context()
            .map_or(0, |context| context.buffers().len())
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        if let Err(err) = self.inner.slot.stop(&self.inner.device, Some(self.id)) {
            warn!(
                "Failed to stop streaming on device {}: {}",
                self.inner.device.id(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    use crate::capture::FrameStatus;
    use crate::device::Camera;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::driver::AccessMode;

    fn camera(config: SimConfig) -> (Arc<SimulatedDriver>, Camera) {
        let driver = Arc::new(SimulatedDriver::new(config));
        driver.startup().unwrap();
        let camera = Camera::open(driver.clone(), "DEV_SIM", AccessMode::Full).unwrap();
        (driver, camera)
    }

    fn noop(_: &Device, stream: &CaptureContext, buffer: &Buffer) -> anyhow::Result<()> {
        stream.queue_frame(buffer)?;
        Ok(())
    }

    #[test]
    fn test_get_frame() {
        let (driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();

        let frame = stream
            .get_frame(Duration::from_secs(2), AllocationMode::SelfOwned)
            .unwrap();
        assert_eq!(frame.id(), Some(0));
        assert_eq!(frame.status(), FrameStatus::Complete);
        assert_eq!(frame.width(), Some(64));
        assert_eq!(driver.announced_count(), 0);
        assert!(!driver.is_capturing());
    }

    #[test]
    fn test_get_frame_device_owned_aligned() {
        let config = SimConfig {
            alignment: Some(64),
            ..SimConfig::default()
        };
        let (_driver, camera) = camera(config);
        let stream = camera.primary_stream().unwrap();
        let frame = stream
            .get_frame(Duration::from_secs(2), AllocationMode::DeviceOwned)
            .unwrap();
        assert_eq!(frame.status(), FrameStatus::Complete);
        assert_eq!(frame.storage_address().unwrap() % 64, 0);
    }

    #[test]
    fn test_generator_limit_and_numbering() {
        let (_driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();

        let ids: Vec<u64> = stream
            .get_frame_generator(Some(3), Duration::from_secs(2), AllocationMode::SelfOwned)
            .unwrap()
            .map(|frame| frame.unwrap().id().unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(!stream.is_streaming());
    }

    #[test]
    fn test_generator_argument_checks() {
        let (driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();

        assert!(matches!(
            stream.get_frame_generator(Some(0), Duration::from_secs(1), AllocationMode::SelfOwned),
            Err(CaptureError::InvalidArgument(_))
        ));
        assert!(matches!(
            stream.get_frame_generator(None, Duration::ZERO, AllocationMode::SelfOwned),
            Err(CaptureError::InvalidArgument(_))
        ));

        stream.start_streaming(noop, 2, AllocationMode::SelfOwned).unwrap();
        assert!(matches!(
            stream.get_frame_generator(Some(1), Duration::from_secs(1), AllocationMode::SelfOwned),
            Err(CaptureError::AlreadyStreaming { .. })
        ));
        stream.stop_streaming().unwrap();
        assert_eq!(driver.announced_count(), 0);
    }

    #[test]
    fn test_generator_timeout_tears_down() {
        let config = SimConfig {
            deliver_frames: false,
            ..SimConfig::default()
        };
        let (driver, camera) = camera(config);
        let stream = camera.primary_stream().unwrap();

        let mut frames = stream
            .get_frame_generator(None, Duration::from_millis(20), AllocationMode::SelfOwned)
            .unwrap();
        let err = frames.next().unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert!(frames.next().is_none());
        assert_eq!(driver.announced_count(), 0);
    }

    #[test]
    fn test_streaming_lifecycle() {
        let (driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();

        assert!(matches!(
            stream.start_streaming(noop, 0, AllocationMode::SelfOwned),
            Err(CaptureError::InvalidArgument(_))
        ));

        stream.start_streaming(noop, 3, AllocationMode::SelfOwned).unwrap();
        assert!(stream.is_streaming());
        assert_eq!(stream.session_buffers(), 3);
        assert!(matches!(
            stream.start_streaming(noop, 3, AllocationMode::SelfOwned),
            Err(CaptureError::AlreadyStreaming { .. })
        ));

        stream.stop_streaming().unwrap();
        stream.stop_streaming().unwrap();
        assert!(!stream.is_streaming());
        assert_eq!(driver.announced_count(), 0);
    }

    #[test]
    fn test_minimum_buffer_count_overrides() {
        let config = SimConfig {
            min_buffer_count: Some(7),
            ..SimConfig::default()
        };
        let (_driver, camera) = camera(config);
        let stream = camera.primary_stream().unwrap();
        stream.start_streaming(noop, 3, AllocationMode::SelfOwned).unwrap();
        assert_eq!(stream.session_buffers(), 7);
        stream.stop_streaming().unwrap();
    }

    #[test]
    fn test_disconnect_hides_streaming() {
        let (_driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();
        stream.start_streaming(noop, 2, AllocationMode::SelfOwned).unwrap();

        camera.mark_disconnected();
        assert!(!stream.is_streaming());
        stream.stop_streaming().unwrap();
    }

    #[test]
    fn test_dropping_other_handle_keeps_session() {
        let (driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();
        stream.start_streaming(noop, 2, AllocationMode::SelfOwned).unwrap();

        {
            let other = camera.stream(0).unwrap().open();
            assert!(other.is_streaming());
        }
        drop(camera.primary_stream().unwrap());
        assert!(stream.is_streaming());
        assert!(driver.is_capturing());

        // any handle may still stop it explicitly
        camera.primary_stream().unwrap().stop_streaming().unwrap();
        assert!(!stream.is_streaming());
        assert_eq!(driver.announced_count(), 0);
    }

    #[test]
    fn test_dropping_owner_stops_session() {
        let (driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();
        stream.start_streaming(noop, 2, AllocationMode::SelfOwned).unwrap();

        drop(stream);
        assert!(!driver.is_capturing());
        assert_eq!(driver.announced_count(), 0);
        assert!(!camera.primary_stream().unwrap().is_streaming());
    }

    #[test]
    fn test_stop_while_handler_requeues_through_stream_handle() {
        let (driver, camera) = camera(SimConfig::default());
        let stream = Arc::new(camera.primary_stream().unwrap());
        let requeue_via = camera.primary_stream().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = move |_: &Device, _: &CaptureContext, buffer: &Buffer| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            requeue_via.queue_frame(buffer)?;
            Ok(())
        };
        stream.start_streaming(handler, 2, AllocationMode::SelfOwned).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.load(Ordering::SeqCst) < 5 {
            assert!(Instant::now() < deadline, "frames did not arrive");
            std::thread::sleep(Duration::from_millis(2));
        }

        let (tx, rx) = mpsc::channel();
        let stopper = stream.clone();
        std::thread::spawn(move || {
            let _ = tx.send(stopper.stop_streaming());
        });
        let stopped = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("stop_streaming did not return");
        stopped.unwrap();
        assert!(!stream.is_streaming());
        assert!(!driver.is_capturing());
        assert_eq!(driver.announced_count(), 0);
    }

    #[test]
    fn test_close_reopen() {
        let (_driver, camera) = camera(SimConfig::default());
        let stream = camera.primary_stream().unwrap();
        stream.start_streaming(noop, 2, AllocationMode::SelfOwned).unwrap();

        let closed = stream.close().unwrap();
        let reopened = closed.open();
        assert!(!reopened.is_streaming());
    }
}
