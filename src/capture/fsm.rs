//! Capture state ladder
//!
//! Bringing a stream to life takes four native steps, each with an undo:
//!
//! | State            | enter                          | exit                       |
//! |------------------|--------------------------------|----------------------------|
//! | `Announced`      | register every buffer          | revoke every buffer        |
//! | `Queued`         | queue every buffer             | flush the queue            |
//! | `CaptureStarted` | start the capture engine       | end the capture engine     |
//! | `Acquiring`      | run `AcquisitionStart`         | run `AcquisitionStop`      |
//!
//! [`CaptureFsm`] keeps the stack of entered states and moves along the ladder
//! one step at a time.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::buffer::Buffer;
use super::context::CaptureContext;
use crate::driver::AccessMode;
use crate::error::{CaptureError, Result, TransitionErrors};

/// One rung of the capture ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CaptureState {
    Announced,
    Queued,
    CaptureStarted,
    Acquiring,
}

impl CaptureState {
    pub const ORDER: [CaptureState; 4] = [
        CaptureState::Announced,
        CaptureState::Queued,
        CaptureState::CaptureStarted,
        CaptureState::Acquiring,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Perform the native work of entering this state.
    ///
    /// All-or-nothing: partial work is undone before the error is returned.
    fn enter(self, ctx: &CaptureContext) -> Result<()> {
        match self {
            CaptureState::Announced => announce_all(ctx),
            CaptureState::Queued => queue_all(ctx),
            CaptureState::CaptureStarted => ctx
                .driver()
                .capture_start(ctx.stream_handle())
                .map_err(|code| ctx.native_error(code)),
            CaptureState::Acquiring => acquisition_command(ctx, "AcquisitionStart"),
        }
    }

    /// Undo this state's native work
    fn exit(self, ctx: &CaptureContext) -> Result<()> {
        match self {
            CaptureState::Announced => revoke_all(ctx),
            CaptureState::Queued => {
                let flushed = ctx
                    .driver()
                    .flush_queue(ctx.stream_handle())
                    .map_err(|code| ctx.native_error(code));
                if flushed.is_ok() {
                    ctx.reclaim_all();
                }
                flushed
            }
            CaptureState::CaptureStarted => ctx
                .driver()
                .capture_end(ctx.stream_handle())
                .map_err(|code| ctx.native_error(code)),
            CaptureState::Acquiring => acquisition_command(ctx, "AcquisitionStop"),
        }
    }
}

fn announce_all(ctx: &CaptureContext) -> Result<()> {
    let driver = ctx.driver();
    for (done, buffer) in ctx.buffers().iter().enumerate() {
        let outcome = driver
            .announce_frame(ctx.stream_handle(), buffer.raw_ptr())
            .map_err(|code| ctx.native_error(code));
        let (err, announced) = match outcome {
            Ok(None) => continue,
            Ok(Some(storage)) => match buffer.bind_external_storage(storage) {
                Ok(()) => continue,
                Err(err) => (err, done + 1),
            },
            Err(err) => (err, done),
        };
        for buffer in &ctx.buffers()[..announced] {
            if let Err(code) = driver.revoke_frame(ctx.stream_handle(), buffer.raw_ptr()) {
                warn!("Failed to revoke {} after failed announce: {}", buffer, code);
            }
        }
        return Err(err);
    }
    Ok(())
}

fn revoke_all(ctx: &CaptureContext) -> Result<()> {
    let mut errors = TransitionErrors::new();
    for buffer in ctx.buffers() {
        if let Err(code) = ctx
            .driver()
            .revoke_frame(ctx.stream_handle(), buffer.raw_ptr())
        {
            errors.push(ctx.native_error(code));
        }
    }
    ctx.reclaim_all();
    errors.into_result()
}

fn queue_all(ctx: &CaptureContext) -> Result<()> {
    for buffer in ctx.buffers() {
        if let Err(err) = ctx.lend(buffer) {
            match ctx.driver().flush_queue(ctx.stream_handle()) {
                Ok(()) => ctx.reclaim_all(),
                Err(flush) => warn!("Failed to flush queue after failed queue: {}", flush),
            }
            return Err(err);
        }
    }
    Ok(())
}

fn acquisition_command(ctx: &CaptureContext, command: &str) -> Result<()> {
    let device = ctx.device();
    if device.access_mode() == AccessMode::Read {
        trace!("Skipping {} on read-only device {}", command, device.id());
        return Ok(());
    }
    ctx.driver()
        .run_command(device.handle(), command)
        .map_err(|code| ctx.native_error(code))
}

/// Walks a [`CaptureContext`] up and down the state ladder.
///
/// Dropping the machine unwinds it completely; errors found on the way are
/// logged.
pub struct CaptureFsm {
    context: Arc<CaptureContext>,
    entered: Vec<CaptureState>,
}

impl CaptureFsm {
    pub fn new(context: Arc<CaptureContext>) -> Self {
        Self {
            context,
            entered: Vec::with_capacity(CaptureState::ORDER.len()),
        }
    }

    pub fn context(&self) -> &Arc<CaptureContext> {
        &self.context
    }

    /// States entered so far, lowest first
    pub fn entered(&self) -> &[CaptureState] {
        &self.entered
    }

    pub fn current(&self) -> Option<CaptureState> {
        self.entered.last().copied()
    }

    /// Step along the ladder until `target` is the current state (`None` is
    /// below `Announced`).
    ///
    /// A failed forward step stops the climb where it is. Backward steps always
    /// pop their state, even on failure, and the walk goes on. Everything
    /// collected on the way is returned: one failure as itself, several as
    /// [`CaptureError::Transition`].
    pub fn go_to_state(&mut self, target: Option<CaptureState>) -> Result<()> {
        let target_len = target.map_or(0, |state| state.index() + 1);
        let mut errors = TransitionErrors::new();

        while self.entered.len() < target_len {
            let next = CaptureState::ORDER[self.entered.len()];
            debug!(
                "Entering {:?} on device {} stream {}",
                next,
                self.context.device().id(),
                self.context.stream_handle()
            );
            match next.enter(&self.context) {
                Ok(()) => self.entered.push(next),
                Err(err) => {
                    debug!("Failed to enter {:?}: {}", next, err);
                    errors.push(err);
                    break;
                }
            }
        }

        while self.entered.len() > target_len {
            let Some(last) = self.entered.pop() else {
                break;
            };
            debug!(
                "Leaving {:?} on device {} stream {}",
                last,
                self.context.device().id(),
                self.context.stream_handle()
            );
            if let Err(err) = last.exit(&self.context) {
                debug!("Failed to leave {:?}: {}", last, err);
                errors.push(err);
            }
        }

        errors.into_result()
    }

    pub fn enter_capturing_mode(&mut self) -> Result<()> {
        self.go_to_state(Some(CaptureState::Acquiring))
    }

    pub fn leave_capturing_mode(&mut self) -> Result<()> {
        self.go_to_state(None)
    }

    /// Operations valid only while acquiring
    pub fn acquiring(&self) -> Result<Acquiring<'_>> {
        match self.current() {
            Some(CaptureState::Acquiring) => Ok(Acquiring {
                context: &self.context,
            }),
            _ => Err(CaptureError::NotAcquiring),
        }
    }

    pub fn wait_for_frame(&self, timeout: Duration) -> Result<&Buffer> {
        self.acquiring()?.wait_for_frame(timeout)
    }
}

impl Drop for CaptureFsm {
    fn drop(&mut self) {
        if self.entered.is_empty() {
            return;
        }
        if let Err(err) = self.leave_capturing_mode() {
            warn!(
                "Errors while unwinding capture of device {}: {}",
                self.context.device().id(),
                err
            );
        }
    }
}

/// Capability handed out by [`CaptureFsm::acquiring`]
pub struct Acquiring<'a> {
    context: &'a CaptureContext,
}

impl<'a> Acquiring<'a> {
    /// Wait for the session's buffers to be filled, in queue order, and return
    /// the last one.
    ///
    /// A timeout leaves the state untouched; the caller decides whether to
    /// retry or tear down.
    pub fn wait_for_frame(&self, timeout: Duration) -> Result<&'a Buffer> {
        CaptureContext::wait_timeout_check(timeout)?;
        let context = self.context;
        let mut last = None;
        for buffer in context.buffers() {
            context
                .driver()
                .wait_frame(context.stream_handle(), buffer.raw_ptr(), timeout)
                .map_err(|code| context.native_error(code))?;
            buffer.reclaim();
            last = Some(buffer);
        }
        last.ok_or_else(|| {
            CaptureError::InvalidArgument("Capture session has no buffers".to_string())
        })
    }

    pub fn queue_buffer(&self, buffer: &Buffer) -> Result<()> {
        self.context.queue_frame(buffer)
    }
}
