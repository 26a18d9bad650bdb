//! Opened devices and their streams

mod stream;

pub use stream::{OpenStream, Stream};

use stream::StreamSlot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::driver::{AccessMode, ErrorCode, Handle, StreamDriver};
use crate::error::{CaptureError, Result, TransitionErrors};

/// Identity of an opened device, shared by its streams and capture sessions
#[derive(Debug)]
pub struct Device {
    id: String,
    handle: Handle,
    access_mode: AccessMode,
    disconnected: AtomicBool,
}

impl Device {
    pub fn new(id: impl Into<String>, handle: Handle, access_mode: AccessMode) -> Self {
        Self {
            id: id.into(),
            handle,
            access_mode,
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }
}

/// An opened camera. Closing it (or dropping it) releases the native device.
pub struct Camera {
    driver: Arc<dyn StreamDriver>,
    device: Arc<Device>,
    streams: Vec<(Handle, Arc<StreamSlot>)>,
    closed: bool,
}

impl Camera {
    pub(crate) fn open(driver: Arc<dyn StreamDriver>, id: &str, mode: AccessMode) -> Result<Self> {
        let info = driver
            .open_device(id, mode)
            .map_err(|code| CaptureError::from_native(id, "-", code))?;
        info!(
            "Opened device {} ({:?} access, {} streams)",
            id,
            mode,
            info.streams.len()
        );
        Ok(Self {
            driver,
            device: Arc::new(Device::new(id, info.handle, mode)),
            streams: info
                .streams
                .into_iter()
                .map(|handle| (handle, Arc::new(StreamSlot::default())))
                .collect(),
            closed: false,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn id(&self) -> &str {
        self.device.id()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, index: usize) -> Option<Stream> {
        self.streams.get(index).map(|(handle, slot)| {
            Stream::new(
                self.driver.clone(),
                self.device.clone(),
                *handle,
                slot.clone(),
            )
        })
    }

    /// The first stream, opened
    pub fn primary_stream(&self) -> Result<OpenStream> {
        self.stream(0).map(Stream::open).ok_or_else(|| {
            CaptureError::from_native(self.id(), "-", ErrorCode::NotFound)
        })
    }

    /// Record that the device went away. Streams of this camera stop
    /// reporting themselves as streaming right away.
    pub fn mark_disconnected(&self) {
        warn!("Device {} disconnected", self.id());
        self.device.mark_disconnected();
    }

    pub fn is_disconnected(&self) -> bool {
        self.device.is_disconnected()
    }

    /// Stop streaming on every stream, then release the native device.
    ///
    /// The device is released even if stopping a stream failed; every failure
    /// is reported.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut errors = TransitionErrors::new();
        for (_, slot) in &self.streams {
            if let Err(err) = slot.stop(&self.device, None) {
                errors.push(err);
            }
        }
        if !self.device.is_disconnected() {
            match self.driver.close_device(self.device.handle()) {
                Ok(()) => info!("Closed device {}", self.device.id()),
                Err(code) => errors.push(CaptureError::from_native(self.device.id(), "-", code)),
            }
        }
        errors.into_result()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to close device {}: {}", self.device.id(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimOp, SimulatedDriver};

    fn started() -> Arc<SimulatedDriver> {
        let driver = Arc::new(SimulatedDriver::new(SimConfig::default()));
        driver.startup().unwrap();
        driver
    }

    #[test]
    fn test_open_and_close() {
        let driver = started();
        let camera = Camera::open(driver.clone(), "DEV_SIM", AccessMode::Full).unwrap();
        assert_eq!(camera.stream_count(), 1);
        assert!(camera.stream(1).is_none());
        camera.close().unwrap();

        // released, so it can be opened again
        let camera = Camera::open(driver, "DEV_SIM", AccessMode::Full).unwrap();
        drop(camera);
    }

    #[test]
    fn test_invalid_access_mode() {
        let driver = started();
        let err = Camera::open(driver, "DEV_SIM", AccessMode::None).err().unwrap();
        match err {
            CaptureError::DeviceAccess { code, reason, .. } => {
                assert_eq!(code, ErrorCode::InvalidAccess);
                assert_eq!(reason, "invalid access mode");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_close_stops_streaming() {
        let driver = started();
        let camera = Camera::open(driver.clone(), "DEV_SIM", AccessMode::Full).unwrap();
        let stream = camera.primary_stream().unwrap();
        let handler = |_: &Device, ctx: &crate::capture::CaptureContext, buffer: &crate::capture::Buffer| -> anyhow::Result<()> {
            ctx.queue_frame(buffer)?;
            Ok(())
        };
        stream
            .start_streaming(handler, 2, crate::capture::AllocationMode::SelfOwned)
            .unwrap();

        camera.close().unwrap();
        assert!(!stream.is_streaming());
        assert!(!driver.is_capturing());
        assert_eq!(driver.announced_count(), 0);
    }

    #[test]
    fn test_close_releases_device_after_stop_failure() {
        let driver = started();
        let camera = Camera::open(driver.clone(), "DEV_SIM", AccessMode::Full).unwrap();
        let stream = camera.primary_stream().unwrap();
        let handler = |_: &Device, ctx: &crate::capture::CaptureContext, buffer: &crate::capture::Buffer| -> anyhow::Result<()> {
            ctx.queue_frame(buffer)?;
            Ok(())
        };
        stream
            .start_streaming(handler, 2, crate::capture::AllocationMode::SelfOwned)
            .unwrap();

        driver.fail_next(SimOp::Flush, ErrorCode::Io);
        let err = camera.close().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::DeviceAccess {
                code: ErrorCode::Io,
                ..
            }
        ));
        assert!(!driver.is_capturing());
        assert_eq!(driver.announced_count(), 0);

        // the native device was still released
        let camera = Camera::open(driver, "DEV_SIM", AccessMode::Full).unwrap();
        camera.close().unwrap();
    }

    #[test]
    fn test_disconnect_flag() {
        let driver = started();
        let camera = Camera::open(driver, "DEV_SIM", AccessMode::Full).unwrap();
        let device = camera.device().clone();
        assert!(!device.is_disconnected());
        camera.mark_disconnected();
        assert!(device.is_disconnected());
    }
}
