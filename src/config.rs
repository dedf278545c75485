//! Pipeline configuration loaded from a TOML file.
//!
//! ```toml
//! [codec]
//! kind = "adpcm"
//! direction = "encode"
//! sample_rate = 16000
//! channels = 1
//!
//! [source]
//! type = "file"
//! path = "capture.raw"
//!
//! [sink]
//! type = "udp"
//! target = "127.0.0.1:5000"
//! ```
//!
//! Every section and field is optional; missing values take the defaults
//! below.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::codec::{
    create_codec_with_pool, CodecConfiguration, CodecDirection, CodecKind, CodecSession, SlotPool,
    DEFAULT_SAMPLES_PER_FRAME,
};
use crate::audio::frame_queue::DEFAULT_QUEUE_CAPACITY;
use crate::audio::PipelineOptions;
use crate::error::{ConfigError, PipelineError};

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub codec: CodecSection,
    pub queue: QueueSection,
    pub codec_loop: CodecLoopSection,
    pub source: SourceConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecSection {
    pub kind: CodecKind,
    pub direction: CodecDirection,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: Option<u32>,
    pub profile: Option<u32>,
    pub samples_per_frame: u32,
    pub max_input_size: usize,
    /// Codec-specific data as a byte array.
    pub csd: Vec<u8>,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            kind: CodecKind::Pcm,
            direction: CodecDirection::Decode,
            sample_rate: 16000,
            channels: 1,
            bitrate: None,
            profile: None,
            samples_per_frame: DEFAULT_SAMPLES_PER_FRAME,
            max_input_size: 8 * 1024,
            csd: Vec::new(),
        }
    }
}

impl TryFrom<&CodecSection> for CodecConfiguration {
    type Error = ConfigError;

    fn try_from(section: &CodecSection) -> Result<Self, Self::Error> {
        let mut config = CodecConfiguration::new(
            section.kind,
            section.direction,
            section.sample_rate,
            section.channels,
        )?
        .with_samples_per_frame(section.samples_per_frame)?
        .with_max_input_size(section.max_input_size)?
        .with_csd(section.csd.clone());
        if let Some(bitrate) = section.bitrate {
            config = config.with_bitrate(bitrate);
        }
        if let Some(profile) = section.profile {
            config = config.with_profile(profile);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSection {
    pub input_capacity: usize,
    pub output_capacity: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            input_capacity: DEFAULT_QUEUE_CAPACITY,
            output_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecLoopSection {
    pub idle_backoff_ms: u64,
    pub input_slots: usize,
    pub output_slots: usize,
    /// Pass codec configuration buffers on to the sink.
    pub forward_config: bool,
}

impl Default for CodecLoopSection {
    fn default() -> Self {
        let pool = SlotPool::default();
        Self {
            idle_backoff_ms: 2,
            input_slots: pool.input_slots,
            output_slots: pool.output_slots,
            forward_config: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Raw bytes read from a file in fixed-size chunks.
    File {
        path: PathBuf,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },
    /// Datagrams received on a UDP socket.
    Udp {
        bind: String,
        #[serde(default = "default_queue_capacity")]
        capacity: usize,
    },
    Alsa {
        #[serde(default = "default_device")]
        device: String,
        sample_rate: u32,
        channels: u32,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::File {
            path: PathBuf::from("input.raw"),
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    File {
        path: PathBuf,
    },
    /// Each output frame becomes one datagram.
    Udp {
        #[serde(default = "default_udp_bind")]
        bind: String,
        target: String,
    },
    Alsa {
        #[serde(default = "default_device")]
        device: String,
        sample_rate: u32,
        channels: u32,
        #[serde(default)]
        period_size: Option<usize>,
    },
    #[default]
    Null,
}

fn default_chunk_size() -> usize {
    2048
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_device() -> String {
    "default".to_string()
}

fn default_udp_bind() -> String {
    "0.0.0.0:0".to_string()
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = text.parse()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Check everything that can be checked without opening devices.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.codec_configuration()?;
        if self.codec_loop.input_slots == 0 || self.codec_loop.output_slots == 0 {
            return Err(ConfigError::Invalid("codec_loop slots must be > 0".to_string()));
        }
        if let SourceConfig::File { chunk_size: 0, .. } = self.source {
            return Err(ConfigError::Invalid("source chunk_size must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn codec_configuration(&self) -> Result<CodecConfiguration, ConfigError> {
        CodecConfiguration::try_from(&self.codec)
    }

    pub fn slot_pool(&self) -> SlotPool {
        SlotPool {
            input_slots: self.codec_loop.input_slots,
            output_slots: self.codec_loop.output_slots,
            max_input_size: self.codec.max_input_size,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            input_capacity: self.queue.input_capacity,
            output_capacity: self.queue.output_capacity,
            idle_backoff: Duration::from_millis(self.codec_loop.idle_backoff_ms),
            forward_config: self.codec_loop.forward_config,
        }
    }

    /// Build a not yet started codec session for this configuration.
    pub fn create_session(&self) -> Result<CodecSession, PipelineError> {
        let config = self.codec_configuration()?;
        let codec = create_codec_with_pool(&config, self.slot_pool())?;
        Ok(CodecSession::new(config, codec))
    }
}

impl FromStr for PipelineConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: PipelineConfig = "".parse().unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.queue.input_capacity, 64);
        assert_eq!(config.sink, SinkConfig::Null);
    }

    #[test]
    fn rejects_bad_channels() {
        let err = "[codec]\nchannels = 6\n".parse::<PipelineConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
