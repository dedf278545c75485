//! audiopipe - capture → codec → playback pipeline
//!
//! A small audio transcoding library: an OPUS configuration-frame parser,
//! a synchronous driver for slot-based (MediaCodec style) codecs, bounded
//! frame queues between threads, and a three-thread pipeline tying a capture
//! source, a codec session and a playback sink together.

pub mod audio;
pub mod audio_bridge;
pub mod config;
pub mod error;

pub use audio::{
    AudioPipeline, BoundedFrameQueue, CodecConfiguration, CodecKind, CodecSession, Frame,
    OpusCsd, SynchronousCodecLoop,
};
pub use config::PipelineConfig;
pub use error::{CodecError, ConfigError, OpusConfigError, PipelineError};
