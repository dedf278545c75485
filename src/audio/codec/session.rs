//! Lifecycle wrapper around a [`Codec`] handle.
//!
//! ```text
//! Created → Started → (Running ⇄ Flushed) → Stopped → Released
//! ```
//!
//! Out-of-order lifecycle calls and any use after `release()` fail with a
//! fatal [`CodecError`]. `stop()` and `release()` are idempotent once the
//! session has been started.

use std::fmt;

use uuid::Uuid;

use super::{create_codec, BufferFlags, Codec, CodecConfiguration, InputBuffer, OutputBuffer};
use crate::audio::clock::PresentationClock;
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Running,
    Flushed,
    Stopped,
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Started => "started",
            SessionState::Running => "running",
            SessionState::Flushed => "flushed",
            SessionState::Stopped => "stopped",
            SessionState::Released => "released",
        };
        f.write_str(name)
    }
}

pub struct CodecSession {
    id: Uuid,
    config: CodecConfiguration,
    codec: Box<dyn Codec>,
    state: SessionState,
    clock: PresentationClock,
}

impl CodecSession {
    pub fn new(config: CodecConfiguration, codec: Box<dyn Codec>) -> Self {
        let clock = PresentationClock::new(config.sample_rate(), config.samples_per_frame());
        Self {
            id: Uuid::new_v4(),
            config,
            codec,
            state: SessionState::Created,
            clock,
        }
    }

    /// Create a session backed by the software codec for `config`.
    pub fn create(config: CodecConfiguration) -> Result<Self, CodecError> {
        let codec = create_codec(&config)?;
        Ok(Self::new(config, codec))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &CodecConfiguration {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn clock(&self) -> &PresentationClock {
        &self.clock
    }

    pub fn codec_name(&self) -> &str {
        self.codec.name()
    }

    pub fn start(&mut self) -> Result<(), CodecError> {
        match self.state {
            SessionState::Created => {}
            SessionState::Released => return Err(CodecError::Released),
            state => return Err(CodecError::InvalidState { op: "start", state }),
        }
        log::info!(
            "[{}] starting {} {:?}: {}Hz/{}ch",
            self.id,
            self.config.kind(),
            self.config.direction(),
            self.config.sample_rate(),
            self.config.channel_count(),
        );
        self.codec.start()?;
        self.clock.reset();
        self.state = SessionState::Started;
        Ok(())
    }

    fn ensure_active(&self, op: &'static str) -> Result<(), CodecError> {
        match self.state {
            SessionState::Started | SessionState::Running | SessionState::Flushed => Ok(()),
            SessionState::Released => Err(CodecError::Released),
            state => Err(CodecError::InvalidState { op, state }),
        }
    }

    pub fn dequeue_input_buffer(&mut self) -> Result<Option<InputBuffer>, CodecError> {
        self.ensure_active("dequeue input from")?;
        self.codec.dequeue_input_buffer()
    }

    pub fn queue_input_buffer(
        &mut self,
        buffer: InputBuffer,
        presentation_time_us: u64,
        flags: BufferFlags,
    ) -> Result<(), CodecError> {
        self.ensure_active("queue input to")?;
        self.codec
            .queue_input_buffer(buffer, presentation_time_us, flags)?;
        self.state = SessionState::Running;
        Ok(())
    }

    pub fn dequeue_output_buffer(&mut self) -> Result<Option<OutputBuffer>, CodecError> {
        self.ensure_active("dequeue output from")?;
        self.codec.dequeue_output_buffer()
    }

    pub fn release_output_buffer(&mut self, index: usize) -> Result<(), CodecError> {
        self.ensure_active("release output of")?;
        self.codec.release_output_buffer(index)
    }

    /// Count one produced output unit on the presentation clock.
    pub(crate) fn advance_clock(&mut self) {
        self.clock.advance();
    }

    /// Discard in-flight buffers. The session keeps running afterwards.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.ensure_active("flush")?;
        self.codec.flush()?;
        self.state = SessionState::Flushed;
        log::debug!("[{}] flushed", self.id);
        Ok(())
    }

    /// Stop the codec. A second call, or a call after release, is a no-op.
    pub fn stop(&mut self) -> Result<(), CodecError> {
        match self.state {
            SessionState::Created => {
                return Err(CodecError::InvalidState {
                    op: "stop",
                    state: self.state,
                });
            }
            SessionState::Stopped | SessionState::Released => return Ok(()),
            _ => {}
        }
        if let Err(e) = self.codec.stop() {
            log::warn!("[{}] codec stop failed: {}", self.id, e);
        }
        self.state = SessionState::Stopped;
        log::info!(
            "[{}] stopped after {} frames",
            self.id,
            self.clock.frame_count()
        );
        Ok(())
    }

    /// Stop (if needed) and release the codec. Idempotent.
    pub fn release(&mut self) -> Result<(), CodecError> {
        match self.state {
            SessionState::Created => {
                return Err(CodecError::InvalidState {
                    op: "release",
                    state: self.state,
                });
            }
            SessionState::Released => return Ok(()),
            _ => {}
        }
        self.stop()?;
        self.codec.release();
        self.state = SessionState::Released;
        log::info!("[{}] released", self.id);
        Ok(())
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        if self.state != SessionState::Released {
            log::debug!("[{}] dropped in state {}, releasing codec", self.id, self.state);
            self.codec.release();
        }
    }
}
