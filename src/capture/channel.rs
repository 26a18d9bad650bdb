//! Frame handler that forwards copies over a tokio channel
//!
//! Lets async code consume a streaming session: the handler runs on the
//! device thread, copies each frame, requeues the original and never blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::buffer::Buffer;
use super::context::CaptureContext;
use super::session::FrameHandler;
use crate::device::Device;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Sending half of [`frame_channel`]
pub struct ChannelHandler {
    tx: mpsc::Sender<Buffer>,
    dropped: Arc<AtomicU64>,
    throttler: LogThrottler,
}

impl ChannelHandler {
    /// Counter of frames dropped because the receiver lagged behind
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

impl FrameHandler for ChannelHandler {
    fn on_frame(
        &mut self,
        device: &Device,
        stream: &CaptureContext,
        buffer: &Buffer,
    ) -> anyhow::Result<()> {
        match self.tx.try_send(buffer.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn_throttled!(
                    self.throttler,
                    "channel_full",
                    "Frame receiver for device {} is lagging, {} frames dropped",
                    device.id(),
                    dropped
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Frame receiver for device {} is gone", device.id());
            }
        }
        stream.queue_frame(buffer)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "frame_channel"
    }
}

/// Create a handler that delivers frame copies to the returned receiver.
///
/// At most `capacity` frames are buffered; further frames are dropped and
/// counted until the receiver catches up.
pub fn frame_channel(capacity: usize) -> (ChannelHandler, mpsc::Receiver<Buffer>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handler = ChannelHandler {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        throttler: LogThrottler::new(Duration::from_secs(5)),
    };
    (handler, rx)
}
