//! Slot engine turning a plain frame transform into the [`Codec`] protocol.
//!
//! Input is transformed synchronously when a slot is queued. Produced units
//! wait in a ready list until the caller dequeues them into one of a fixed
//! number of output slots. While the ready list is full, no input slot is
//! handed out, so a slow consumer applies backpressure the way a hardware
//! codec's buffer pool does.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::{BufferFlags, BufferInfo, Codec, InputBuffer, OutputBuffer};
use crate::error::CodecError;

/// A pure encoder/decoder step.
pub trait Transform: Send {
    fn name(&self) -> &str;

    /// Initialization data emitted once, flagged `CODEC_CONFIG`, before any
    /// output.
    fn config_frame(&mut self) -> Option<Bytes> {
        None
    }

    /// Whether every produced unit is independently decodable.
    fn key_frames(&self) -> bool {
        false
    }

    /// Transform one input payload, appending zero or more output units.
    fn process(&mut self, input: &[u8], out: &mut Vec<Bytes>) -> anyhow::Result<()>;

    /// Emit whatever is buffered at end of stream.
    fn finish(&mut self, _out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Drop internal state after a flush.
    fn reset(&mut self) {}
}

/// Slot pool sizes of a [`SoftwareCodec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPool {
    pub input_slots: usize,
    pub output_slots: usize,
    pub max_input_size: usize,
}

impl Default for SlotPool {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_slots: 4,
            max_input_size: 8 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Configured,
    Executing,
    Stopped,
    Released,
}

pub struct SoftwareCodec<T> {
    transform: T,
    pool: SlotPool,
    state: EngineState,
    free_inputs: VecDeque<usize>,
    free_outputs: VecDeque<usize>,
    held_outputs: Vec<bool>,
    ready: VecDeque<(Bytes, BufferInfo)>,
    input_eos: bool,
    scratch: Vec<Bytes>,
}

impl<T: Transform> SoftwareCodec<T> {
    pub fn new(transform: T, pool: SlotPool) -> Self {
        let pool = SlotPool {
            input_slots: pool.input_slots.max(1),
            output_slots: pool.output_slots.max(1),
            max_input_size: pool.max_input_size.max(1),
        };
        Self {
            transform,
            pool,
            state: EngineState::Configured,
            free_inputs: (0..pool.input_slots).collect(),
            free_outputs: (0..pool.output_slots).collect(),
            held_outputs: vec![false; pool.output_slots],
            ready: VecDeque::new(),
            input_eos: false,
            scratch: Vec::new(),
        }
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    fn ensure_executing(&self, op: &str) -> Result<(), CodecError> {
        if self.state != EngineState::Executing {
            return Err(CodecError::Illegal(format!(
                "{} while {:?}",
                op, self.state
            )));
        }
        Ok(())
    }

    fn reset_slots(&mut self) {
        self.free_inputs = (0..self.pool.input_slots).collect();
        self.free_outputs = (0..self.pool.output_slots).collect();
        self.held_outputs = vec![false; self.pool.output_slots];
        self.ready.clear();
        self.input_eos = false;
    }

    fn push_units(&mut self, presentation_time_us: u64) {
        let flags = if self.transform.key_frames() {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        };
        for data in self.scratch.drain(..) {
            let info = BufferInfo {
                size: data.len(),
                presentation_time_us,
                flags,
            };
            self.ready.push_back((data, info));
        }
    }
}

impl<T: Transform> Codec for SoftwareCodec<T> {
    fn name(&self) -> &str {
        self.transform.name()
    }

    fn start(&mut self) -> Result<(), CodecError> {
        match self.state {
            EngineState::Configured | EngineState::Stopped => {}
            other => {
                return Err(CodecError::Illegal(format!("start while {:?}", other)));
            }
        }
        self.reset_slots();
        self.state = EngineState::Executing;
        if let Some(config) = self.transform.config_frame() {
            let info = BufferInfo {
                size: config.len(),
                presentation_time_us: 0,
                flags: BufferFlags::CODEC_CONFIG,
            };
            self.ready.push_back((config, info));
        }
        Ok(())
    }

    fn dequeue_input_buffer(&mut self) -> Result<Option<InputBuffer>, CodecError> {
        self.ensure_executing("dequeue input")?;
        if self.input_eos || self.ready.len() >= self.pool.output_slots {
            return Ok(None);
        }
        Ok(self.free_inputs.pop_front().map(|index| InputBuffer {
            index,
            data: BytesMut::with_capacity(self.pool.max_input_size),
        }))
    }

    fn queue_input_buffer(
        &mut self,
        buffer: InputBuffer,
        presentation_time_us: u64,
        flags: BufferFlags,
    ) -> Result<(), CodecError> {
        self.ensure_executing("queue input")?;
        let index = buffer.index;
        if index >= self.pool.input_slots || self.free_inputs.contains(&index) {
            return Err(CodecError::InvalidBuffer {
                kind: "input",
                index,
            });
        }
        // The slot goes back to the pool whatever the transform does with it.
        self.free_inputs.push_back(index);

        if self.input_eos {
            return Err(CodecError::Transient(
                "input queued after end of stream".to_string(),
            ));
        }
        if buffer.data.len() > self.pool.max_input_size {
            return Err(CodecError::Transient(format!(
                "input of {} bytes exceeds slot size {}",
                buffer.data.len(),
                self.pool.max_input_size
            )));
        }

        let eos = flags.contains(BufferFlags::END_OF_STREAM);
        self.scratch.clear();
        let mut result = Ok(());
        if !buffer.data.is_empty() {
            result = self.transform.process(&buffer.data, &mut self.scratch);
        }
        if eos && result.is_ok() {
            result = self.transform.finish(&mut self.scratch);
        }
        self.push_units(presentation_time_us);

        if eos {
            self.input_eos = true;
            let info = BufferInfo {
                size: 0,
                presentation_time_us,
                flags: BufferFlags::END_OF_STREAM,
            };
            self.ready.push_back((Bytes::new(), info));
        }
        result.map_err(CodecError::Backend)
    }

    fn dequeue_output_buffer(&mut self) -> Result<Option<OutputBuffer>, CodecError> {
        self.ensure_executing("dequeue output")?;
        if self.ready.is_empty() {
            return Ok(None);
        }
        let Some(index) = self.free_outputs.pop_front() else {
            return Ok(None);
        };
        let Some((data, info)) = self.ready.pop_front() else {
            self.free_outputs.push_front(index);
            return Ok(None);
        };
        self.held_outputs[index] = true;
        Ok(Some(OutputBuffer { index, data, info }))
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), CodecError> {
        self.ensure_executing("release output")?;
        match self.held_outputs.get_mut(index) {
            Some(held) if *held => {
                *held = false;
                self.free_outputs.push_back(index);
                Ok(())
            }
            _ => Err(CodecError::InvalidBuffer {
                kind: "output",
                index,
            }),
        }
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        self.ensure_executing("flush")?;
        self.reset_slots();
        self.transform.reset();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        match self.state {
            EngineState::Executing | EngineState::Configured => {
                self.reset_slots();
                self.transform.reset();
                self.state = EngineState::Stopped;
                Ok(())
            }
            EngineState::Stopped => Ok(()),
            EngineState::Released => Err(CodecError::Illegal("stop after release".to_string())),
        }
    }

    fn release(&mut self) {
        self.ready.clear();
        self.state = EngineState::Released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::PcmPassthrough;

    fn started(pool: SlotPool) -> SoftwareCodec<PcmPassthrough> {
        let mut codec = SoftwareCodec::new(PcmPassthrough::new(), pool);
        codec.start().unwrap();
        codec
    }

    fn submit(codec: &mut SoftwareCodec<PcmPassthrough>, payload: &[u8], pts: u64) {
        let mut input = codec.dequeue_input_buffer().unwrap().unwrap();
        input.data.extend_from_slice(payload);
        codec.queue_input_buffer(input, pts, BufferFlags::NONE).unwrap();
    }

    #[test]
    fn full_ready_list_blocks_input() {
        let mut codec = started(SlotPool {
            input_slots: 4,
            output_slots: 2,
            max_input_size: 64,
        });
        submit(&mut codec, b"ab", 0);
        submit(&mut codec, b"cd", 1);
        assert!(codec.dequeue_input_buffer().unwrap().is_none());

        let out = codec.dequeue_output_buffer().unwrap().unwrap();
        assert_eq!(&out.data[..], b"ab");
        assert!(out.info.flags.contains(BufferFlags::KEY_FRAME));
        codec.release_output_buffer(out.index).unwrap();
        assert!(codec.dequeue_input_buffer().unwrap().is_some());
    }

    #[test]
    fn double_release_is_rejected() {
        let mut codec = started(SlotPool::default());
        submit(&mut codec, b"x", 0);
        let out = codec.dequeue_output_buffer().unwrap().unwrap();
        codec.release_output_buffer(out.index).unwrap();
        let err = codec.release_output_buffer(out.index).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn end_of_stream_is_emitted_last() {
        let mut codec = started(SlotPool::default());
        submit(&mut codec, b"tail", 7);
        let input = codec.dequeue_input_buffer().unwrap().unwrap();
        codec
            .queue_input_buffer(input, 8, BufferFlags::END_OF_STREAM)
            .unwrap();
        assert!(codec.dequeue_input_buffer().unwrap().is_none());

        let data = codec.dequeue_output_buffer().unwrap().unwrap();
        assert_eq!(data.info.presentation_time_us, 7);
        let eos = codec.dequeue_output_buffer().unwrap().unwrap();
        assert!(eos.info.flags.contains(BufferFlags::END_OF_STREAM));
        assert_eq!(eos.info.size, 0);
    }

    #[test]
    fn flush_drops_pending_output() {
        let mut codec = started(SlotPool::default());
        submit(&mut codec, b"one", 0);
        codec.flush().unwrap();
        assert!(codec.dequeue_output_buffer().unwrap().is_none());
    }
}
