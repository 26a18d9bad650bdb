//! Frame buffers
//!
//! A [`Buffer`] couples a native [`RawFrame`] descriptor with the [`Storage`]
//! the device writes image data into. The descriptor lives in its own heap
//! allocation so its address stays fixed while the device holds it.

use std::alloc::{handle_alloc_error, Layout};
use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::fmt;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::format::{PayloadType, PixelFormat};
use crate::driver::RawFrame;
use crate::error::{CaptureError, Result};

/// Who provides a buffer's storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Storage is allocated when the buffer is created
    #[default]
    SelfOwned,
    /// The device allocates storage when the buffer is announced
    DeviceOwned,
}

/// Outcome of the last capture into a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    Complete,
    Incomplete,
    TooSmall,
    Invalid,
}

impl FrameStatus {
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => FrameStatus::Complete,
            -1 => FrameStatus::Incomplete,
            -2 => FrameStatus::TooSmall,
            _ => FrameStatus::Invalid,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            FrameStatus::Complete => 0,
            FrameStatus::Incomplete => -1,
            FrameStatus::TooSmall => -2,
            FrameStatus::Invalid => -3,
        }
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which metadata fields the device filled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(pub u32);

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags(0);
    pub const DIMENSION: FrameFlags = FrameFlags(1);
    pub const OFFSET: FrameFlags = FrameFlags(2);
    pub const FRAME_ID: FrameFlags = FrameFlags(4);
    pub const TIMESTAMP: FrameFlags = FrameFlags(8);
    pub const IMAGE_DATA: FrameFlags = FrameFlags(16);
    pub const PAYLOAD_TYPE: FrameFlags = FrameFlags(32);
    pub const CHUNK_DATA_PRESENT: FrameFlags = FrameFlags(64);

    pub fn contains(&self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

/// Round `n` up to a multiple of `alignment` (a power of two)
pub fn align_up(n: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (n + alignment - 1) & !(alignment - 1)
}

fn check_alignment(alignment: usize) -> Result<()> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(CaptureError::InvalidArgument(format!(
            "Buffer alignment {} is not a power of two",
            alignment
        )));
    }
    Ok(())
}

/// Owned, zero-initialised block of frame memory starting at an aligned address.
///
/// The block is over-allocated by `alignment - 1` bytes and the first aligned
/// address inside it becomes the start of the storage.
pub struct Storage {
    block: NonNull<[u8]>,
    start: NonNull<u8>,
    len: usize,
    alignment: usize,
}

// SAFETY: Storage exclusively owns its block. Concurrent writes only come from
// the device while the owning buffer is lent to it, and a buffer is only lent
// while no `BufferView` shares the storage; no view can be taken until the
// device gives it back.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    /// Allocate `len` bytes whose first byte is a multiple of `alignment`
    pub fn allocate(len: usize, alignment: usize) -> Result<Storage> {
        check_alignment(alignment)?;
        let total = len
            .checked_add(alignment - 1)
            .ok_or(CaptureError::AllocationError {
                size: len,
                alignment,
            })?;

        let mut block: Vec<u8> = Vec::new();
        block
            .try_reserve_exact(total)
            .map_err(|_| CaptureError::AllocationError {
                size: len,
                alignment,
            })?;
        block.resize(total, 0);
        Ok(Self::from_block(block.into_boxed_slice(), len, alignment))
    }

    fn from_block(block: Box<[u8]>, len: usize, alignment: usize) -> Storage {
        let block = NonNull::from(Box::leak(block));
        let base = block.as_ptr() as *mut u8;
        let offset = align_up(base as usize, alignment) - base as usize;
        // SAFETY: offset < alignment and the block holds len + alignment - 1 bytes
        let start = unsafe { NonNull::new_unchecked(base.add(offset)) };
        Storage {
            block,
            start,
            len,
            alignment,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.start.as_ptr()
    }

    pub fn address(&self) -> usize {
        self.start.as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: start..start+len lies inside the owned block
        unsafe { std::slice::from_raw_parts(self.start.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.start.as_ptr(), self.len) }
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        let mut copy = match Storage::allocate(self.len, self.alignment) {
            Ok(storage) => storage,
            Err(_) => handle_alloc_error(
                Layout::from_size_align(self.len.max(1), self.alignment)
                    .unwrap_or_else(|_| Layout::new::<u8>()),
            ),
        };
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        copy
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        // SAFETY: block came from Box::leak in from_block and is released once
        unsafe { drop(Box::from_raw(self.block.as_ptr())) };
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// Read-only view over a buffer's image bytes.
///
/// Holds a reference on the storage, so it stays valid after the buffer it
/// came from is dropped or re-used.
#[derive(Clone)]
pub struct BufferView {
    storage: Arc<Storage>,
    offset: usize,
    len: usize,
}

impl BufferView {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Zero-copy conversion; the returned `Bytes` keeps the storage alive
    pub fn into_bytes(self) -> Bytes {
        Bytes::from_owner(self)
    }
}

impl Deref for BufferView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage.as_slice()[self.offset..self.offset + self.len]
    }
}

impl AsRef<[u8]> for BufferView {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// Storage for one frame plus the metadata the device reports for it
pub struct Buffer {
    mode: AllocationMode,
    alignment: usize,
    requested_size: usize,
    storage: RwLock<Option<Arc<Storage>>>,
    raw: Box<UnsafeCell<RawFrame>>,
    /// queued with the device, which may write the storage at any time
    lent: AtomicBool,
}

// SAFETY: the descriptor is written by the device only while the buffer is
// queued and by the engine only before registration or through &mut self.
// Readers look at it after the device reported completion.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Create a buffer for frames of `size` bytes.
    ///
    /// Self-owned buffers allocate immediately, rounding `size` up to the
    /// alignment. Device-owned buffers only record the size.
    pub fn new(size: usize, mode: AllocationMode, alignment: usize) -> Result<Buffer> {
        check_alignment(alignment)?;
        let capacity = match mode {
            AllocationMode::SelfOwned => align_up(size, alignment),
            AllocationMode::DeviceOwned => size,
        };
        let buffer_size = u32::try_from(capacity).map_err(|_| {
            CaptureError::InvalidArgument(format!("Buffer size {} exceeds u32", capacity))
        })?;

        let mut raw = RawFrame {
            buffer_size,
            receive_status: FrameStatus::Invalid.as_raw(),
            ..RawFrame::default()
        };

        let storage = match mode {
            AllocationMode::SelfOwned => {
                let storage = Storage::allocate(capacity, alignment)?;
                raw.buffer = storage.as_ptr() as *mut c_void;
                Some(Arc::new(storage))
            }
            AllocationMode::DeviceOwned => None,
        };

        Ok(Buffer {
            mode,
            alignment,
            requested_size: size,
            storage: RwLock::new(storage),
            raw: Box::new(UnsafeCell::new(raw)),
            lent: AtomicBool::new(false),
        })
    }

    /// Adopt storage handed out by the device during registration.
    ///
    /// Must only be called while the device is not using the buffer.
    pub(crate) fn bind_external_storage(&self, storage: Storage) -> Result<()> {
        if self.mode != AllocationMode::DeviceOwned {
            return Err(CaptureError::InvalidArgument(
                "Only device-owned buffers accept external storage".to_string(),
            ));
        }
        let required = self.requested_size;
        if storage.len() < required {
            return Err(CaptureError::BufferTooSmall {
                actual: storage.len(),
                required,
            });
        }
        if storage.address() % self.alignment != 0 {
            return Err(CaptureError::AllocationError {
                size: storage.len(),
                alignment: self.alignment,
            });
        }

        // SAFETY: caller guarantees the device is not accessing the descriptor
        unsafe { (*self.raw.get()).buffer = storage.as_ptr() as *mut c_void };
        *self.storage.write() = Some(Arc::new(storage));
        Ok(())
    }

    /// Mark the buffer as handed to the device.
    ///
    /// Refused while a [`BufferView`] still shares the storage, since the
    /// device would write underneath it.
    pub(crate) fn lend(&self) -> Result<()> {
        let storage = self.storage.write();
        if storage.as_ref().is_some_and(|s| Arc::strong_count(s) > 1) {
            return Err(CaptureError::InvalidArgument(
                "Buffer still has live views and cannot be queued".to_string(),
            ));
        }
        self.lent.store(true, Ordering::Release);
        Ok(())
    }

    /// The device is done with the buffer
    pub(crate) fn reclaim(&self) {
        let _storage = self.storage.write();
        self.lent.store(false, Ordering::Release);
    }

    pub fn is_queued(&self) -> bool {
        self.lent.load(Ordering::Acquire)
    }

    pub(crate) fn raw_ptr(&self) -> *mut RawFrame {
        self.raw.get()
    }

    pub(crate) fn set_context(&self, context: *const c_void) {
        // SAFETY: only called while the buffer is not registered
        unsafe { (*self.raw.get()).context[0] = context as *mut c_void };
    }

    fn raw(&self) -> &RawFrame {
        // SAFETY: see the Sync impl
        unsafe { &*self.raw.get() }
    }

    pub fn allocation_mode(&self) -> AllocationMode {
        self.mode
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Size requested at creation
    pub fn requested_size(&self) -> usize {
        self.requested_size
    }

    /// Bytes of storage currently bound, zero if none yet
    pub fn capacity(&self) -> usize {
        self.storage.read().as_ref().map_or(0, |s| s.len())
    }

    /// Address of the storage's first byte
    pub fn storage_address(&self) -> Option<usize> {
        self.storage.read().as_ref().map(|s| s.address())
    }

    /// Distance of the image data from the start of storage, when reported
    pub fn image_data_offset(&self) -> Option<usize> {
        let raw = self.raw();
        if raw.image_data.is_null() || raw.buffer.is_null() {
            return None;
        }
        Some((raw.image_data as usize).saturating_sub(raw.buffer as usize))
    }

    /// Read-only view over the image bytes; the whole storage unless the
    /// device reported a separate image data start (chunk layouts).
    ///
    /// `None` while the buffer is queued with the device or has no storage
    /// yet. A live view keeps the buffer from being queued again: drop it, or
    /// copy the buffer, before handing the buffer back. Writing goes through
    /// [`image_data_mut`](Self::image_data_mut), which needs exclusive access.
    pub fn as_view(&self) -> Option<BufferView> {
        let guard = self.storage.read();
        if self.lent.load(Ordering::Acquire) {
            return None;
        }
        let storage = guard.clone()?;
        drop(guard);
        let offset = self.image_data_offset().unwrap_or(0).min(storage.len());
        let len = storage.len() - offset;
        Some(BufferView {
            storage,
            offset,
            len,
        })
    }

    /// Mutable image bytes, the writable counterpart of [`as_view`](Self::as_view).
    /// Available only while no view shares the storage.
    pub fn image_data_mut(&mut self) -> Option<&mut [u8]> {
        let offset = self.image_data_offset().unwrap_or(0);
        let storage = Arc::get_mut(self.storage.get_mut().as_mut()?)?;
        let offset = offset.min(storage.len());
        Some(&mut storage.as_mut_slice()[offset..])
    }

    pub fn status(&self) -> FrameStatus {
        FrameStatus::from_raw(self.raw().receive_status)
    }

    pub fn flags(&self) -> FrameFlags {
        FrameFlags(self.raw().receive_flags)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat(self.raw().pixel_format)
    }

    pub fn buffer_size(&self) -> usize {
        self.raw().buffer_size as usize
    }

    fn flagged<T>(&self, flag: FrameFlags, value: T) -> Option<T> {
        self.flags().contains(flag).then_some(value)
    }

    pub fn width(&self) -> Option<u32> {
        self.flagged(FrameFlags::DIMENSION, self.raw().width)
    }

    pub fn height(&self) -> Option<u32> {
        self.flagged(FrameFlags::DIMENSION, self.raw().height)
    }

    pub fn offset_x(&self) -> Option<u32> {
        self.flagged(FrameFlags::OFFSET, self.raw().offset_x)
    }

    pub fn offset_y(&self) -> Option<u32> {
        self.flagged(FrameFlags::OFFSET, self.raw().offset_y)
    }

    pub fn id(&self) -> Option<u64> {
        self.flagged(FrameFlags::FRAME_ID, self.raw().frame_id)
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.flagged(FrameFlags::TIMESTAMP, self.raw().timestamp)
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        self.flagged(
            FrameFlags::PAYLOAD_TYPE,
            PayloadType::from_raw(self.raw().payload_type),
        )
    }

    pub fn contains_chunk_data(&self) -> Option<bool> {
        self.flagged(
            FrameFlags::CHUNK_DATA_PRESENT,
            self.raw().chunk_data_present != 0,
        )
    }

    /// Overwrite the frame id (the device's own counter restarts with every
    /// capture session)
    pub fn set_id(&mut self, id: u64) {
        let raw = self.raw.get_mut();
        raw.frame_id = id;
        raw.receive_flags |= FrameFlags::FRAME_ID.0;
    }
}

impl Clone for Buffer {
    /// Deep copy: duplicates the storage and re-derives every address in the
    /// descriptor from the new storage. The copy is not registered anywhere.
    fn clone(&self) -> Self {
        let storage = self
            .storage
            .read()
            .as_ref()
            .map(|s| Arc::new(Storage::clone(s)));
        let src = self.raw();

        let mut raw = RawFrame {
            buffer: ptr::null_mut(),
            buffer_size: src.buffer_size,
            context: [ptr::null_mut(); 4],
            receive_status: src.receive_status,
            frame_id: src.frame_id,
            timestamp: src.timestamp,
            image_data: ptr::null_mut(),
            receive_flags: src.receive_flags,
            pixel_format: src.pixel_format,
            width: src.width,
            height: src.height,
            offset_x: src.offset_x,
            offset_y: src.offset_y,
            payload_type: src.payload_type,
            chunk_data_present: src.chunk_data_present,
        };
        if let Some(storage) = &storage {
            raw.buffer = storage.as_ptr() as *mut c_void;
            if let Some(offset) = self.image_data_offset() {
                // SAFETY: the copy has the same length as the source storage
                raw.image_data = unsafe { storage.as_ptr().add(offset.min(storage.len())) };
            }
        }

        Buffer {
            mode: AllocationMode::SelfOwned,
            alignment: self.alignment,
            requested_size: self.requested_size,
            storage: RwLock::new(storage),
            raw: Box::new(UnsafeCell::new(raw)),
            lent: AtomicBool::new(false),
        }
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.raw();
        write!(
            f,
            "Buffer(id={}, status={}, buffer={:#x})",
            raw.frame_id,
            self.status(),
            raw.buffer as usize
        )
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("mode", &self.mode)
            .field("alignment", &self.alignment)
            .field("requested_size", &self.requested_size)
            .field("status", &self.status())
            .field("storage", &*self.storage.read())
            .finish()
    }
}
