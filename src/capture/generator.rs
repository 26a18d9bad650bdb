//! Synchronous frame acquisition
//!
//! Each step climbs the ladder to `Acquiring`, waits for the single buffer,
//! copies it out and steps back down to `Announced`. The buffer stays
//! registered between frames; only queueing and capture are redone.

use std::marker::PhantomData;
use std::time::Duration;

use tracing::{debug, warn};

use super::buffer::Buffer;
use super::fsm::{CaptureFsm, CaptureState};
use crate::device::OpenStream;
use crate::error::{CaptureError, Result};

/// Iterator over synchronously captured frames.
///
/// Yields deep copies, numbered from 0 in production order. The first error
/// ends the iteration after the capture has been torn down. A failure while
/// stepping down after a successful frame is held back: the frame is yielded
/// first and the error on the following call.
///
/// Borrows the stream, so it cannot be closed while frames are being pulled.
pub struct FrameGenerator<'s> {
    fsm: CaptureFsm,
    limit: Option<u64>,
    timeout: Duration,
    produced: u64,
    deferred: Option<CaptureError>,
    finished: bool,
    _stream: PhantomData<&'s OpenStream>,
}

impl<'s> FrameGenerator<'s> {
    pub(crate) fn new(fsm: CaptureFsm, limit: Option<u64>, timeout: Duration) -> Self {
        Self {
            fsm,
            limit,
            timeout,
            produced: 0,
            deferred: None,
            finished: false,
            _stream: PhantomData,
        }
    }

    /// Frames produced so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stop early and tear the capture down, reporting any failure that would
    /// otherwise only be logged on drop.
    pub fn close(mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let teardown = self.finish();
        match self.deferred.take() {
            Some(err) => {
                if let Err(teardown) = teardown {
                    warn!("Teardown after deferred error failed: {}", teardown);
                }
                Err(err)
            }
            None => teardown,
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        self.fsm.leave_capturing_mode()
    }

    fn fail(&mut self, err: CaptureError) -> Option<Result<Buffer>> {
        if let Err(teardown) = self.finish() {
            warn!("Teardown after capture error failed: {}", teardown);
        }
        Some(Err(err))
    }

    fn capture_one(&mut self) -> Result<Buffer> {
        self.fsm.enter_capturing_mode()?;
        let mut frame = self.fsm.wait_for_frame(self.timeout)?.clone();

        if let Err(err) = self.fsm.go_to_state(Some(CaptureState::Announced)) {
            debug!("Deferring step-down failure: {}", err);
            self.deferred = Some(err);
        }

        frame.set_id(self.produced);
        self.produced += 1;
        Ok(frame)
    }
}

impl Iterator for FrameGenerator<'_> {
    type Item = Result<Buffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(err) = self.deferred.take() {
            return self.fail(err);
        }
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return match self.finish() {
                Ok(()) => None,
                Err(err) => Some(Err(err)),
            };
        }
        match self.capture_one() {
            Ok(frame) => Some(Ok(frame)),
            Err(err) => self.fail(err),
        }
    }
}
