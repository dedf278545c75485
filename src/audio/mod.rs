//! audio - Codec sessions, the synchronous codec loop, and the threaded
//! capture → codec → playback pipeline built on them.
//!
//! Uses ALSA for live audio I/O (feature `alsa`) and libopus for the OPUS
//! backend (feature `opus`). ADPCM and PCM backends are always available.

#[cfg(feature = "alsa")]
mod alsa_device;
pub mod clock;
pub mod codec;
pub mod codec_loop;
pub mod device;
mod frame;
pub mod frame_queue;
pub mod opus_config;
mod pipeline;
mod play;
mod record;

#[cfg(feature = "alsa")]
pub use alsa_device::{AlsaCapture, AlsaParams, AlsaPlayback};
pub use clock::PresentationClock;
pub use codec::{
    create_codec, BufferFlags, BufferInfo, Codec, CodecConfiguration, CodecDirection, CodecKind,
    CodecSession, SessionState,
};
pub use codec_loop::{CodecHandler, InputFill, LoopExit, OutputKind, Progress, SynchronousCodecLoop};
pub use device::{CaptureSource, MemorySink, MemorySource, NullSink, PlaybackSink, RawFileSink, RawFileSource};
pub use frame::Frame;
pub use frame_queue::BoundedFrameQueue;
pub use opus_config::{OpusCsd, OpusHead};
pub use pipeline::{AudioPipeline, PipelineOptions, PipelineStats};
