//! In-process device that speaks the [`StreamDriver`] protocol
//!
//! Enforces the same ordering rules a native SDK does (announce before queue,
//! capture start before frames flow, no revoke while a frame is in flight) and
//! produces frames from a worker thread at a fixed interval. Faults can be
//! injected per operation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::{
    AccessMode, DeviceInfo, DriverResult, ErrorCode, FrameCallback, Handle, RawFrame,
    StreamDriver,
};
use crate::capture::buffer::{FrameFlags, FrameStatus, Storage};
use crate::capture::format::{PayloadType, PixelFormat};
use crate::config::SimulationConfig;

/// Simulated device parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_interval: Duration,
    /// Reported `StreamBufferAlignment`, `None` if the feature is absent
    pub alignment: Option<usize>,
    /// Reported `StreamAnnounceBufferMinimum`, `None` if the feature is absent
    pub min_buffer_count: Option<u32>,
    /// Bytes of chunk data placed in front of the image
    pub chunk_size: u32,
    /// When false, queued frames are never completed
    pub deliver_frames: bool,
}

impl SimConfig {
    pub fn payload_size(&self) -> u32 {
        let image = (self.width as u64 * self.height as u64 * self.pixel_format.bits_per_pixel() as u64)
            .div_ceil(8);
        (image + self.chunk_size as u64).min(u32::MAX as u64) as u32
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            device_id: "DEV_SIM".to_string(),
            width: 64,
            height: 48,
            pixel_format: PixelFormat::MONO8,
            frame_interval: Duration::from_millis(5),
            alignment: None,
            min_buffer_count: None,
            chunk_size: 0,
            deliver_frames: true,
        }
    }
}

impl From<&SimulationConfig> for SimConfig {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            width: config.width,
            height: config.height,
            pixel_format: config.pixel_format,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            alignment: config.alignment,
            min_buffer_count: config.min_buffer_count,
            chunk_size: config.chunk_size,
            deliver_frames: true,
        }
    }
}

/// Operation selector for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Startup,
    OpenDevice,
    PayloadSize,
    Announce,
    Revoke,
    Queue,
    Flush,
    CaptureStart,
    CaptureEnd,
    Command,
    Wait,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    skip: u32,
    code: ErrorCode,
    sticky: bool,
}

#[derive(Clone, Copy)]
struct FramePtr(*mut RawFrame);

// Frames are only touched by the worker while queued; the capture engine
// guarantees they stay alive until revoked.
unsafe impl Send for FramePtr {}

struct Pending {
    frame: FramePtr,
    callback: Option<FrameCallback>,
}

#[derive(Default)]
struct SimState {
    started: bool,
    next_handle: usize,
    /// device handle -> stream handle
    devices: HashMap<Handle, Handle>,
    announced: HashSet<usize>,
    queue: VecDeque<Pending>,
    completed: HashSet<usize>,
    /// frame currently being filled by the worker
    in_flight: Option<usize>,
    capturing: Option<(Handle, Handle)>,
    acquiring: bool,
    frame_counter: u64,
    commands: Vec<String>,
    faults: HashMap<SimOp, Fault>,
    delivered: u64,
    callback_failures: u64,
}

impl SimState {
    fn check_fault(&mut self, op: SimOp) -> DriverResult<()> {
        let Some(fault) = self.faults.get_mut(&op) else {
            return Ok(());
        };
        if fault.skip > 0 {
            fault.skip -= 1;
            return Ok(());
        }
        let code = fault.code;
        if !fault.sticky {
            self.faults.remove(&op);
        }
        debug!("Injected fault on {:?}: {}", op, code);
        Err(code)
    }

    fn check_started(&self) -> DriverResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(ErrorCode::ApiNotStarted)
        }
    }

    fn check_stream(&self, stream: Handle) -> DriverResult<Handle> {
        self.check_started()?;
        self.devices
            .iter()
            .find(|(_, s)| **s == stream)
            .map(|(d, _)| *d)
            .ok_or(ErrorCode::BadHandle)
    }

    fn is_queued(&self, frame: usize) -> bool {
        self.queue.iter().any(|p| p.frame.0 as usize == frame)
    }
}

struct Shared {
    config: SimConfig,
    state: Mutex<SimState>,
    /// wakes the worker
    wake: Condvar,
    /// signals completed frames to waiters
    done: Condvar,
    epoch: Instant,
}

/// Simulated camera with a single stream
pub struct SimulatedDriver {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDriver {
    pub fn new(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(SimState {
                    next_handle: 0x100,
                    ..SimState::default()
                }),
                wake: Condvar::new(),
                done: Condvar::new(),
                epoch: Instant::now(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Fail the next call of `op` with `code`
    pub fn fail_next(&self, op: SimOp, code: ErrorCode) {
        self.fail_after(op, 0, code);
    }

    /// Let `skip` calls of `op` succeed, then fail the next one with `code`
    pub fn fail_after(&self, op: SimOp, skip: u32, code: ErrorCode) {
        self.shared.state.lock().faults.insert(
            op,
            Fault {
                skip,
                code,
                sticky: false,
            },
        );
    }

    /// Fail every call of `op` until faults are cleared
    pub fn fail_always(&self, op: SimOp, code: ErrorCode) {
        self.shared.state.lock().faults.insert(
            op,
            Fault {
                skip: 0,
                code,
                sticky: true,
            },
        );
    }

    pub fn clear_faults(&self) {
        self.shared.state.lock().faults.clear();
    }

    pub fn announced_count(&self) -> usize {
        self.shared.state.lock().announced.len()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.state.lock().capturing.is_some()
    }

    pub fn is_acquiring(&self) -> bool {
        self.shared.state.lock().acquiring
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().started
    }

    /// Commands run so far, oldest first
    pub fn commands(&self) -> Vec<String> {
        self.shared.state.lock().commands.clone()
    }

    /// Frames completed by the worker
    pub fn delivered(&self) -> u64 {
        self.shared.state.lock().delivered
    }

    /// Callback invocations that reported a failure
    pub fn callback_failures(&self) -> u64 {
        self.shared.state.lock().callback_failures
    }

    fn stop_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // capture_end from inside a completion callback
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.capturing = None;
            state.acquiring = false;
        }
        self.shared.wake.notify_all();
        self.stop_worker();
    }
}

impl Shared {
    /// Write a deterministic test pattern and metadata into `frame`.
    ///
    /// # Safety
    /// `frame` must point to an announced frame whose buffer spans
    /// `buffer_size` bytes.
    unsafe fn fill(&self, frame: *mut RawFrame, frame_id: u64) {
        let frame = &mut *frame;
        let config = &self.config;
        let size = frame.buffer_size as usize;
        let chunk = (config.chunk_size as usize).min(size);

        if !frame.buffer.is_null() && size > 0 {
            let data = std::slice::from_raw_parts_mut(frame.buffer as *mut u8, size);
            data[..chunk].fill(0xCC);
            for (i, byte) in data[chunk..].iter_mut().enumerate() {
                *byte = (frame_id as usize).wrapping_add(i) as u8;
            }
            frame.image_data = (frame.buffer as *mut u8).add(chunk);
        }

        let mut flags = FrameFlags::DIMENSION
            | FrameFlags::OFFSET
            | FrameFlags::FRAME_ID
            | FrameFlags::TIMESTAMP
            | FrameFlags::IMAGE_DATA
            | FrameFlags::PAYLOAD_TYPE;
        if config.chunk_size > 0 {
            flags = flags | FrameFlags::CHUNK_DATA_PRESENT;
        }

        frame.receive_status = if size < config.payload_size() as usize {
            FrameStatus::TooSmall.as_raw()
        } else {
            FrameStatus::Complete.as_raw()
        };
        frame.receive_flags = flags.0;
        frame.frame_id = frame_id;
        frame.timestamp = self.epoch.elapsed().as_nanos() as u64;
        frame.pixel_format = config.pixel_format.0;
        frame.width = config.width;
        frame.height = config.height;
        frame.offset_x = 0;
        frame.offset_y = 0;
        frame.payload_type = PayloadType::Image.as_raw();
        frame.chunk_data_present = u8::from(config.chunk_size > 0);
    }

    fn run(self: Arc<Self>, device: Handle, stream: Handle) {
        trace!("Simulated capture worker started for stream {}", stream);
        loop {
            let pending = {
                let mut state = self.state.lock();
                if state.capturing.is_none() {
                    break;
                }
                self.wake.wait_for(&mut state, self.config.frame_interval);
                if state.capturing.is_none() {
                    break;
                }
                if !state.acquiring || !self.config.deliver_frames {
                    continue;
                }
                let Some(pending) = state.queue.pop_front() else {
                    continue;
                };
                state.frame_counter += 1;
                state.in_flight = Some(pending.frame.0 as usize);
                (pending, state.frame_counter)
            };
            let (pending, frame_id) = pending;

            // Safety: the frame cannot be revoked while in flight.
            unsafe { self.fill(pending.frame.0, frame_id) };

            match pending.callback {
                Some(callback) => {
                    // Safety: the callback contract is the one the engine registered.
                    let status = unsafe { callback(device, stream, pending.frame.0) };
                    let mut state = self.state.lock();
                    state.in_flight = None;
                    state.delivered += 1;
                    if status != ErrorCode::Success.as_raw() {
                        debug!("Frame callback reported {}", ErrorCode::from_raw(status));
                        state.callback_failures += 1;
                    }
                }
                None => {
                    let mut state = self.state.lock();
                    state.in_flight = None;
                    state.delivered += 1;
                    state.completed.insert(pending.frame.0 as usize);
                    self.done.notify_all();
                }
            }
        }
        trace!("Simulated capture worker stopped for stream {}", stream);
    }
}

impl StreamDriver for SimulatedDriver {
    fn startup(&self) -> DriverResult<()> {
        let mut state = self.shared.state.lock();
        state.check_fault(SimOp::Startup)?;
        state.started = true;
        Ok(())
    }

    fn shutdown(&self) -> DriverResult<()> {
        let mut state = self.shared.state.lock();
        state.check_started()?;
        state.started = false;
        state.devices.clear();
        Ok(())
    }

    fn open_device(&self, id: &str, mode: AccessMode) -> DriverResult<DeviceInfo> {
        let mut state = self.shared.state.lock();
        state.check_started()?;
        state.check_fault(SimOp::OpenDevice)?;
        if id != self.shared.config.device_id {
            return Err(ErrorCode::NotFound);
        }
        if mode == AccessMode::None {
            return Err(ErrorCode::InvalidAccess);
        }
        if !state.devices.is_empty() {
            return Err(ErrorCode::InUse);
        }
        let device = Handle(state.next_handle);
        let stream = Handle(state.next_handle + 1);
        state.next_handle += 0x10;
        state.devices.insert(device, stream);
        Ok(DeviceInfo {
            handle: device,
            streams: vec![stream],
        })
    }

    fn close_device(&self, device: Handle) -> DriverResult<()> {
        let mut state = self.shared.state.lock();
        state.check_started()?;
        if state.capturing.is_some_and(|(d, _)| d == device) {
            return Err(ErrorCode::Busy);
        }
        state
            .devices
            .remove(&device)
            .map(|_| ())
            .ok_or(ErrorCode::BadHandle)
    }

    fn payload_size(&self, stream: Handle) -> DriverResult<u32> {
        let mut state = self.shared.state.lock();
        state.check_stream(stream)?;
        state.check_fault(SimOp::PayloadSize)?;
        Ok(self.shared.config.payload_size())
    }

    fn buffer_alignment(&self, stream: Handle) -> DriverResult<Option<usize>> {
        self.shared.state.lock().check_stream(stream)?;
        Ok(self.shared.config.alignment)
    }

    fn min_buffer_count(&self, stream: Handle) -> DriverResult<Option<u32>> {
        self.shared.state.lock().check_stream(stream)?;
        Ok(self.shared.config.min_buffer_count)
    }

    fn announce_frame(
        &self,
        stream: Handle,
        frame: *mut RawFrame,
    ) -> DriverResult<Option<Storage>> {
        let mut state = self.shared.state.lock();
        state.check_stream(stream)?;
        state.check_fault(SimOp::Announce)?;
        if frame.is_null() {
            return Err(ErrorCode::BadParameter);
        }
        let address = frame as usize;
        if state.announced.contains(&address) {
            return Err(ErrorCode::Already);
        }

        // Safety: the engine passes frames it owns for the whole registration.
        let raw = unsafe { &mut *frame };
        let storage = if raw.buffer.is_null() {
            if raw.buffer_size == 0 {
                return Err(ErrorCode::BadParameter);
            }
            let alignment = self.shared.config.alignment.unwrap_or(1);
            let storage = Storage::allocate(raw.buffer_size as usize, alignment)
                .map_err(|_| ErrorCode::Resources)?;
            raw.buffer = storage.as_ptr() as *mut c_void;
            Some(storage)
        } else {
            None
        };

        state.announced.insert(address);
        Ok(storage)
    }

    fn revoke_frame(&self, stream: Handle, frame: *mut RawFrame) -> DriverResult<()> {
        let mut state = self.shared.state.lock();
        state.check_stream(stream)?;
        state.check_fault(SimOp::Revoke)?;
        let address = frame as usize;
        if !state.announced.contains(&address) {
            return Err(ErrorCode::BadParameter);
        }
        if state.in_flight == Some(address)
            || (state.capturing.is_some() && state.is_queued(address))
        {
            return Err(ErrorCode::Busy);
        }
        state.queue.retain(|p| p.frame.0 as usize != address);
        state.completed.remove(&address);
        state.announced.remove(&address);
        Ok(())
    }

    fn queue_frame(
        &self,
        stream: Handle,
        frame: *mut RawFrame,
        callback: Option<FrameCallback>,
    ) -> DriverResult<()> {
        let mut state = self.shared.state.lock();
        state.check_stream(stream)?;
        state.check_fault(SimOp::Queue)?;
        let address = frame as usize;
        if !state.announced.contains(&address) {
            return Err(ErrorCode::BadParameter);
        }
        if state.is_queued(address) {
            return Err(ErrorCode::Already);
        }
        state.completed.remove(&address);
        state.queue.push_back(Pending {
            frame: FramePtr(frame),
            callback,
        });
        Ok(())
    }

    fn flush_queue(&self, stream: Handle) -> DriverResult<()> {
        let mut state = self.shared.state.lock();
        state.check_stream(stream)?;
        state.check_fault(SimOp::Flush)?;
        state.queue.clear();
        state.completed.clear();
        Ok(())
    }

    fn capture_start(&self, stream: Handle) -> DriverResult<()> {
        let device = {
            let mut state = self.shared.state.lock();
            let device = state.check_stream(stream)?;
            state.check_fault(SimOp::CaptureStart)?;
            if state.capturing.is_some() {
                return Err(ErrorCode::Already);
            }
            state.capturing = Some((device, stream));
            device
        };

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("sim-capture".to_string())
            .spawn(move || shared.run(device, stream));
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(_) => {
                self.shared.state.lock().capturing = None;
                Err(ErrorCode::Resources)
            }
        }
    }

    fn capture_end(&self, stream: Handle) -> DriverResult<()> {
        {
            let mut state = self.shared.state.lock();
            state.check_stream(stream)?;
            state.check_fault(SimOp::CaptureEnd)?;
            if state.capturing.is_none() {
                return Err(ErrorCode::InvalidCall);
            }
            state.capturing = None;
            state.acquiring = false;
        }
        self.shared.wake.notify_all();
        self.stop_worker();
        Ok(())
    }

    fn run_command(&self, device: Handle, name: &str) -> DriverResult<()> {
        let mut state = self.shared.state.lock();
        state.check_started()?;
        if !state.devices.contains_key(&device) {
            return Err(ErrorCode::BadHandle);
        }
        state.check_fault(SimOp::Command)?;
        match name {
            "AcquisitionStart" => state.acquiring = true,
            "AcquisitionStop" => state.acquiring = false,
            _ => return Err(ErrorCode::NotFound),
        }
        state.commands.push(name.to_string());
        drop(state);
        self.shared.wake.notify_all();
        Ok(())
    }

    fn wait_frame(
        &self,
        stream: Handle,
        frame: *mut RawFrame,
        timeout: Duration,
    ) -> DriverResult<()> {
        let deadline = Instant::now() + timeout;
        let address = frame as usize;
        let mut state = self.shared.state.lock();
        state.check_stream(stream)?;
        state.check_fault(SimOp::Wait)?;
        if !state.announced.contains(&address) {
            return Err(ErrorCode::BadParameter);
        }
        loop {
            if state.completed.remove(&address) {
                return Ok(());
            }
            if !state.is_queued(address) && state.in_flight != Some(address) {
                return Err(ErrorCode::InvalidCall);
            }
            if self
                .shared
                .done
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return if state.completed.remove(&address) {
                    Ok(())
                } else {
                    Err(ErrorCode::Timeout)
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(driver: &SimulatedDriver) -> DeviceInfo {
        driver.startup().unwrap();
        driver.open_device("DEV_SIM", AccessMode::Full).unwrap()
    }

    #[test]
    fn test_requires_startup() {
        let driver = SimulatedDriver::new(SimConfig::default());
        assert_eq!(
            driver.open_device("DEV_SIM", AccessMode::Full).unwrap_err(),
            ErrorCode::ApiNotStarted
        );
    }

    #[test]
    fn test_open_device_checks() {
        let driver = SimulatedDriver::new(SimConfig::default());
        driver.startup().unwrap();
        assert_eq!(
            driver.open_device("DEV_OTHER", AccessMode::Full).unwrap_err(),
            ErrorCode::NotFound
        );
        assert_eq!(
            driver.open_device("DEV_SIM", AccessMode::None).unwrap_err(),
            ErrorCode::InvalidAccess
        );
        let info = driver.open_device("DEV_SIM", AccessMode::Full).unwrap();
        assert_eq!(info.streams.len(), 1);
        assert_eq!(
            driver.open_device("DEV_SIM", AccessMode::Full).unwrap_err(),
            ErrorCode::InUse
        );
        driver.close_device(info.handle).unwrap();
        assert_eq!(
            driver.payload_size(info.streams[0]).unwrap_err(),
            ErrorCode::BadHandle
        );
    }

    #[test]
    fn test_payload_size() {
        let config = SimConfig {
            width: 10,
            height: 10,
            pixel_format: PixelFormat::RGB8,
            chunk_size: 16,
            ..SimConfig::default()
        };
        assert_eq!(config.payload_size(), 316);
    }

    #[test]
    fn test_queue_requires_announce() {
        let driver = SimulatedDriver::new(SimConfig::default());
        let info = open(&driver);
        let mut frame = RawFrame::default();
        assert_eq!(
            driver
                .queue_frame(info.streams[0], &mut frame, None)
                .unwrap_err(),
            ErrorCode::BadParameter
        );
    }

    #[test]
    fn test_driver_allocates_when_buffer_missing() {
        let config = SimConfig {
            alignment: Some(256),
            ..SimConfig::default()
        };
        let driver = SimulatedDriver::new(config);
        let info = open(&driver);
        let mut frame = RawFrame {
            buffer_size: 100,
            ..RawFrame::default()
        };
        let storage = driver
            .announce_frame(info.streams[0], &mut frame)
            .unwrap()
            .unwrap();
        assert_eq!(storage.len(), 100);
        assert_eq!(storage.address() % 256, 0);
        assert_eq!(frame.buffer as usize, storage.address());
        driver.revoke_frame(info.streams[0], &mut frame).unwrap();
    }

    #[test]
    fn test_wait_frame_delivers_pattern() {
        let driver = SimulatedDriver::new(SimConfig::default());
        let info = open(&driver);
        let stream = info.streams[0];
        let mut storage = Storage::allocate(driver.config().payload_size() as usize, 1).unwrap();
        let mut frame = RawFrame {
            buffer: storage.as_ptr() as *mut c_void,
            buffer_size: storage.len() as u32,
            ..RawFrame::default()
        };

        driver.announce_frame(stream, &mut frame).unwrap();
        driver.queue_frame(stream, &mut frame, None).unwrap();
        driver.capture_start(stream).unwrap();
        driver.run_command(info.handle, "AcquisitionStart").unwrap();
        driver
            .wait_frame(stream, &mut frame, Duration::from_secs(2))
            .unwrap();
        driver.run_command(info.handle, "AcquisitionStop").unwrap();
        driver.capture_end(stream).unwrap();

        assert_eq!(frame.receive_status, FrameStatus::Complete.as_raw());
        assert_eq!(frame.frame_id, 1);
        assert_eq!(frame.width, 64);
        let data = storage.as_mut_slice();
        assert_eq!(data[0], 1);
        assert_eq!(data[1], 2);

        driver.revoke_frame(stream, &mut frame).unwrap();
        assert_eq!(driver.delivered(), 1);
    }

    #[test]
    fn test_wait_frame_times_out_without_acquisition() {
        let driver = SimulatedDriver::new(SimConfig::default());
        let info = open(&driver);
        let stream = info.streams[0];
        let mut storage = Storage::allocate(16, 1).unwrap();
        let mut frame = RawFrame {
            buffer: storage.as_mut_slice().as_mut_ptr() as *mut c_void,
            buffer_size: 16,
            ..RawFrame::default()
        };
        driver.announce_frame(stream, &mut frame).unwrap();
        driver.queue_frame(stream, &mut frame, None).unwrap();
        driver.capture_start(stream).unwrap();

        assert_eq!(
            driver
                .wait_frame(stream, &mut frame, Duration::from_millis(20))
                .unwrap_err(),
            ErrorCode::Timeout
        );
        assert_eq!(
            driver.revoke_frame(stream, &mut frame).unwrap_err(),
            ErrorCode::Busy
        );
        driver.capture_end(stream).unwrap();
        driver.revoke_frame(stream, &mut frame).unwrap();
    }

    #[test]
    fn test_fault_injection() {
        let driver = SimulatedDriver::new(SimConfig::default());
        let info = open(&driver);
        let stream = info.streams[0];

        driver.fail_after(SimOp::PayloadSize, 1, ErrorCode::Io);
        assert!(driver.payload_size(stream).is_ok());
        assert_eq!(driver.payload_size(stream).unwrap_err(), ErrorCode::Io);
        assert!(driver.payload_size(stream).is_ok());

        driver.fail_always(SimOp::PayloadSize, ErrorCode::Busy);
        assert!(driver.payload_size(stream).is_err());
        assert!(driver.payload_size(stream).is_err());
        driver.clear_faults();
        assert!(driver.payload_size(stream).is_ok());
    }

    #[test]
    fn test_unknown_command() {
        let driver = SimulatedDriver::new(SimConfig::default());
        let info = open(&driver);
        assert_eq!(
            driver.run_command(info.handle, "Explode").unwrap_err(),
            ErrorCode::NotFound
        );
        assert!(driver.commands().is_empty());
    }
}
