//! Synchronous driver for slot-based codecs.
//!
//! Turns the acquire-input / submit / drain-output / release protocol into
//! a callback loop running on one dedicated thread. Each iteration:
//!
//! 1. probes for an input slot (zero timeout) and asks the handler to fill it;
//! 2. drains every ready output buffer, classifies it by flags and hands it
//!    to the handler before giving the slot back;
//! 3. ends once end of stream has been submitted and seen on the output side.
//!
//! Some codecs throw on individual calls without being broken, so
//! non-fatal errors are logged and count as an idle iteration. Fatal ones
//! (use after release, invalid lifecycle calls) end the loop at once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use super::clock::PresentationClock;
use super::codec::{BufferFlags, BufferInfo, CodecSession, InputBuffer, SessionState};
use crate::error::CodecError;

/// Sleep between iterations that moved no data.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// What the input callback put into the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFill {
    /// The slot holds a payload to submit with this timestamp.
    Data { presentation_time_us: u64 },
    /// Nothing available yet; the slot is kept for the next iteration.
    Pending,
    /// No more input. A zero-length end-of-stream buffer is submitted.
    EndOfStream,
}

impl InputFill {
    /// Maps the raw timestamp convention where a negative value marks the
    /// end of input.
    pub fn from_presentation_time(presentation_time_us: i64) -> Self {
        if presentation_time_us < 0 {
            InputFill::EndOfStream
        } else {
            InputFill::Data {
                presentation_time_us: presentation_time_us as u64,
            }
        }
    }
}

/// Classification of a drained output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Config,
    KeyFrame,
    EndOfStream,
    Data,
}

impl OutputKind {
    /// Config wins over key frame, which wins over end of stream.
    pub fn classify(flags: BufferFlags) -> Self {
        if flags.contains(BufferFlags::CODEC_CONFIG) {
            OutputKind::Config
        } else if flags.contains(BufferFlags::KEY_FRAME) {
            OutputKind::KeyFrame
        } else if flags.contains(BufferFlags::END_OF_STREAM) {
            OutputKind::EndOfStream
        } else {
            OutputKind::Data
        }
    }
}

/// Callbacks invoked by [`SynchronousCodecLoop`].
pub trait CodecHandler {
    /// Write up to `buf.capacity()` bytes of input into `buf`.
    ///
    /// `clock` reflects the output units produced so far and can be used to
    /// compute the presentation timestamp.
    fn on_input_data(&mut self, buf: &mut BytesMut, clock: &PresentationClock) -> InputFill;

    /// Called exactly once per drained output buffer. The buffer is released
    /// back to the codec as soon as this returns, whatever the outcome.
    fn on_output_data(
        &mut self,
        data: &Bytes,
        info: &BufferInfo,
        kind: OutputKind,
    ) -> anyhow::Result<()>;

    /// Called once after the end-of-stream buffer has been drained.
    fn on_end_of_stream(&mut self) {}
}

/// Result of one [`SynchronousCodecLoop::process_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Some input was submitted or output drained.
    Busy,
    /// Nothing moved; the caller should back off briefly.
    Idle,
    /// End of stream has been submitted and drained.
    Finished,
}

/// Why [`SynchronousCodecLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub inputs_queued: u64,
    pub outputs_drained: u64,
    pub config_buffers: u64,
    pub transient_errors: u64,
}

pub struct SynchronousCodecLoop {
    session: CodecSession,
    idle_backoff: Duration,
    pending_input: Option<InputBuffer>,
    input_eos_sent: bool,
    output_eos_seen: bool,
    stats: LoopStats,
}

impl SynchronousCodecLoop {
    pub fn new(session: CodecSession) -> Self {
        Self {
            session,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            pending_input: None,
            input_eos_sent: false,
            output_eos_seen: false,
            stats: LoopStats::default(),
        }
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn session(&self) -> &CodecSession {
        &self.session
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn start(&mut self) -> Result<(), CodecError> {
        self.session.start()?;
        self.reset_stream();
        Ok(())
    }

    fn reset_stream(&mut self) {
        self.pending_input = None;
        self.input_eos_sent = false;
        self.output_eos_seen = false;
    }

    /// Iterate until end of stream, a fatal error, or `running` turning
    /// false.
    pub fn run<H: CodecHandler>(
        &mut self,
        handler: &mut H,
        running: &AtomicBool,
    ) -> Result<LoopExit, CodecError> {
        log::info!("[{}] codec loop running ({})", self.session.id(), self.session.codec_name());
        while running.load(Ordering::Relaxed) {
            match self.process_once(handler)? {
                Progress::Finished => {
                    log::info!(
                        "[{}] end of stream after {} outputs",
                        self.session.id(),
                        self.stats.outputs_drained
                    );
                    handler.on_end_of_stream();
                    return Ok(LoopExit::EndOfStream);
                }
                Progress::Idle => thread::sleep(self.idle_backoff),
                Progress::Busy => {}
            }
        }
        log::info!("[{}] codec loop cancelled", self.session.id());
        Ok(LoopExit::Cancelled)
    }

    /// Run a single input/output iteration.
    pub fn process_once<H: CodecHandler>(&mut self, handler: &mut H) -> Result<Progress, CodecError> {
        if self.session.state() == SessionState::Released {
            return Err(CodecError::Released);
        }
        if self.output_eos_seen {
            return Ok(Progress::Finished);
        }

        let step = self
            .feed_input(handler)
            .and_then(|fed| Ok(self.drain_output(handler)? | fed));
        match step {
            Ok(_) if self.output_eos_seen => Ok(Progress::Finished),
            Ok(true) => Ok(Progress::Busy),
            Ok(false) => Ok(Progress::Idle),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.stats.transient_errors += 1;
                log::warn!("[{}] ignoring codec error this iteration: {}", self.session.id(), e);
                Ok(Progress::Idle)
            }
        }
    }

    fn feed_input<H: CodecHandler>(&mut self, handler: &mut H) -> Result<bool, CodecError> {
        if self.input_eos_sent {
            return Ok(false);
        }
        let mut slot = match self.pending_input.take() {
            Some(slot) => slot,
            None => match self.session.dequeue_input_buffer()? {
                Some(slot) => slot,
                None => return Ok(false),
            },
        };
        slot.data.clear();

        match handler.on_input_data(&mut slot.data, self.session.clock()) {
            InputFill::Pending => {
                slot.data.clear();
                self.pending_input = Some(slot);
                Ok(false)
            }
            InputFill::Data {
                presentation_time_us,
            } => {
                self.session
                    .queue_input_buffer(slot, presentation_time_us, BufferFlags::NONE)?;
                self.stats.inputs_queued += 1;
                Ok(true)
            }
            InputFill::EndOfStream => {
                slot.data.clear();
                self.session
                    .queue_input_buffer(slot, 0, BufferFlags::END_OF_STREAM)?;
                self.input_eos_sent = true;
                log::debug!("[{}] end of stream submitted", self.session.id());
                Ok(true)
            }
        }
    }

    fn drain_output<H: CodecHandler>(&mut self, handler: &mut H) -> Result<bool, CodecError> {
        let mut drained = false;
        while let Some(out) = self.session.dequeue_output_buffer()? {
            drained = true;
            let kind = OutputKind::classify(out.info.flags);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handler.on_output_data(&out.data, &out.info, kind)
            }));
            let released = self.session.release_output_buffer(out.index);
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("[{}] output callback failed: {:#}", self.session.id(), e);
                }
                Err(payload) => {
                    if let Err(e) = released {
                        log::error!("[{}] release after panic failed: {}", self.session.id(), e);
                    }
                    panic::resume_unwind(payload);
                }
            }
            released?;

            match kind {
                OutputKind::Config => self.stats.config_buffers += 1,
                OutputKind::KeyFrame | OutputKind::Data => {
                    self.session.advance_clock();
                    self.stats.outputs_drained += 1;
                }
                OutputKind::EndOfStream => {}
            }
            // A key frame may carry the end-of-stream flag too.
            if out.info.flags.contains(BufferFlags::END_OF_STREAM) {
                self.output_eos_seen = true;
                break;
            }
        }
        Ok(drained)
    }

    /// Discard in-flight buffers and accept a new stream.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.session.flush()?;
        self.reset_stream();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), CodecError> {
        self.pending_input = None;
        self.session.stop()
    }

    pub fn release(&mut self) -> Result<(), CodecError> {
        self.pending_input = None;
        self.session.release()
    }
}
