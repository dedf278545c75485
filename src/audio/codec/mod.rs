//! Codec abstraction: the slot-based buffer exchange protocol driven by
//! [`SynchronousCodecLoop`](crate::audio::SynchronousCodecLoop), the session
//! state machine wrapped around it, and the software backends.

mod adpcm;
mod configuration;
#[cfg(feature = "opus")]
mod opus_codec;
mod pcm;
mod session;
mod software;

use std::fmt;
use std::ops::BitOr;

use bytes::{Bytes, BytesMut};

use crate::error::CodecError;

pub use adpcm::{AdpcmDecoder, AdpcmEncoder};
pub use configuration::{CodecConfiguration, CodecDirection, CodecKind, DEFAULT_SAMPLES_PER_FRAME};
#[cfg(feature = "opus")]
pub use opus_codec::{OpusDecoderTransform, OpusEncoderTransform};
pub use pcm::PcmPassthrough;
pub use session::{CodecSession, SessionState};
pub use software::{SlotPool, SoftwareCodec, Transform};

/// Flag bits attached to a codec buffer.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    /// Output can be decoded without earlier buffers.
    pub const KEY_FRAME: Self = Self(1);
    /// Output carries initialization data only, nothing playable.
    pub const CODEC_CONFIG: Self = Self(2);
    /// Last buffer of the stream.
    pub const END_OF_STREAM: Self = Self(4);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::KEY_FRAME) {
            names.push("KEY_FRAME");
        }
        if self.contains(Self::CODEC_CONFIG) {
            names.push("CODEC_CONFIG");
        }
        if self.contains(Self::END_OF_STREAM) {
            names.push("END_OF_STREAM");
        }
        write!(f, "BufferFlags({})", names.join(" | "))
    }
}

/// Metadata of a produced output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub presentation_time_us: u64,
    pub flags: BufferFlags,
}

/// A writable input slot handed out by [`Codec::dequeue_input_buffer`].
///
/// `data` starts empty; its capacity is the codec's maximum input size.
#[derive(Debug)]
pub struct InputBuffer {
    pub index: usize,
    pub data: BytesMut,
}

/// A filled output slot handed out by [`Codec::dequeue_output_buffer`].
///
/// The slot stays owned by the caller until it is given back with
/// [`Codec::release_output_buffer`].
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    pub index: usize,
    pub data: Bytes,
    pub info: BufferInfo,
}

/// A stateful encoder or decoder exposing the acquire / submit / drain /
/// release buffer protocol.
///
/// All probes are zero-timeout: they return `Ok(None)` immediately when no
/// slot is available.
pub trait Codec: Send {
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<(), CodecError>;

    fn dequeue_input_buffer(&mut self) -> Result<Option<InputBuffer>, CodecError>;

    /// Submit a slot obtained from [`Codec::dequeue_input_buffer`]. The
    /// payload is `buffer.data`.
    fn queue_input_buffer(
        &mut self,
        buffer: InputBuffer,
        presentation_time_us: u64,
        flags: BufferFlags,
    ) -> Result<(), CodecError>;

    fn dequeue_output_buffer(&mut self) -> Result<Option<OutputBuffer>, CodecError>;

    fn release_output_buffer(&mut self, index: usize) -> Result<(), CodecError>;

    /// Discard all queued input and pending output. Outstanding slot
    /// indices become invalid.
    fn flush(&mut self) -> Result<(), CodecError>;

    fn stop(&mut self) -> Result<(), CodecError>;

    fn release(&mut self);
}

/// Build the software backend for `config`.
pub fn create_codec(config: &CodecConfiguration) -> Result<Box<dyn Codec>, CodecError> {
    let pool = SlotPool {
        max_input_size: config.max_input_size(),
        ..SlotPool::default()
    };
    create_codec_with_pool(config, pool)
}

/// Like [`create_codec`] with explicit slot pool sizes.
pub fn create_codec_with_pool(
    config: &CodecConfiguration,
    pool: SlotPool,
) -> Result<Box<dyn Codec>, CodecError> {
    let channels = config.channel_count();
    match (config.kind(), config.direction()) {
        (CodecKind::Pcm, _) => Ok(Box::new(SoftwareCodec::new(PcmPassthrough::new(), pool))),
        (CodecKind::Adpcm, CodecDirection::Encode) => {
            Ok(Box::new(SoftwareCodec::new(AdpcmEncoder::new(channels), pool)))
        }
        (CodecKind::Adpcm, CodecDirection::Decode) => {
            Ok(Box::new(SoftwareCodec::new(AdpcmDecoder::new(channels), pool)))
        }
        #[cfg(feature = "opus")]
        (CodecKind::Opus, CodecDirection::Encode) => Ok(Box::new(SoftwareCodec::new(
            OpusEncoderTransform::new(config)?,
            pool,
        ))),
        #[cfg(feature = "opus")]
        (CodecKind::Opus, CodecDirection::Decode) => Ok(Box::new(SoftwareCodec::new(
            OpusDecoderTransform::new(config)?,
            pool,
        ))),
        #[cfg(not(feature = "opus"))]
        (CodecKind::Opus, _) => Err(CodecError::Unsupported(
            "opus (build with the `opus` feature)".to_string(),
        )),
        (CodecKind::Aac, _) => Err(CodecError::Unsupported(
            "aac has no software backend".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_contain() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(!flags.contains(BufferFlags::CODEC_CONFIG));
        assert!(!flags.contains(BufferFlags::NONE));
    }

    #[test]
    fn aac_is_rejected() {
        let config =
            CodecConfiguration::new(CodecKind::Aac, CodecDirection::Decode, 44100, 1).unwrap();
        let err = create_codec(&config).err().unwrap();
        assert!(err.is_fatal());
    }
}
