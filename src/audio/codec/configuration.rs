use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Samples per encoded unit for fixed-frame codecs (one AAC frame).
pub const DEFAULT_SAMPLES_PER_FRAME: u32 = 1024;

/// Maximum payload accepted by one input slot.
const DEFAULT_MAX_INPUT_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Aac,
    Opus,
    Adpcm,
    Pcm,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecKind::Aac => "aac",
            CodecKind::Opus => "opus",
            CodecKind::Adpcm => "adpcm",
            CodecKind::Pcm => "pcm",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecDirection {
    Encode,
    #[default]
    Decode,
}

/// Immutable description of one codec session.
///
/// Built once before the session starts. The `with_*` methods consume and
/// return the value so a configuration is complete before it is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfiguration {
    kind: CodecKind,
    direction: CodecDirection,
    sample_rate: u32,
    channel_count: u32,
    profile: Option<u32>,
    bitrate: Option<u32>,
    samples_per_frame: u32,
    max_input_size: usize,
    csd: Bytes,
}

impl CodecConfiguration {
    /// Validates `sample_rate > 0` and a channel count of 1 or 2.
    pub fn new(
        kind: CodecKind,
        direction: CodecDirection,
        sample_rate: u32,
        channel_count: u32,
    ) -> Result<Self, ConfigError> {
        if sample_rate == 0 {
            return Err(ConfigError::Invalid("sample rate must be > 0".to_string()));
        }
        if !(1..=2).contains(&channel_count) {
            return Err(ConfigError::Invalid(format!(
                "channel count must be 1 or 2, got {}",
                channel_count
            )));
        }
        Ok(Self {
            kind,
            direction,
            sample_rate,
            channel_count,
            profile: None,
            bitrate: None,
            samples_per_frame: DEFAULT_SAMPLES_PER_FRAME,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            csd: Bytes::new(),
        })
    }

    /// Codec-specific data, e.g. an AAC AudioSpecificConfig or an OPUS
    /// identification header / configuration frame.
    pub fn with_csd(mut self, csd: impl Into<Bytes>) -> Self {
        self.csd = csd.into();
        self
    }

    pub fn with_profile(mut self, profile: u32) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_samples_per_frame(mut self, samples: u32) -> Result<Self, ConfigError> {
        if samples == 0 {
            return Err(ConfigError::Invalid("samples per frame must be > 0".to_string()));
        }
        self.samples_per_frame = samples;
        Ok(self)
    }

    pub fn with_max_input_size(mut self, size: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::Invalid("max input size must be > 0".to_string()));
        }
        self.max_input_size = size;
        Ok(self)
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn direction(&self) -> CodecDirection {
        self.direction
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    pub fn profile(&self) -> Option<u32> {
        self.profile
    }

    pub fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }

    pub fn samples_per_frame(&self) -> u32 {
        self.samples_per_frame
    }

    pub fn max_input_size(&self) -> usize {
        self.max_input_size
    }

    pub fn csd(&self) -> &Bytes {
        &self.csd
    }
}
