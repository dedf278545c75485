//! OPUS transforms backed by libopus.
//!
//! The encoder consumes 16-bit interleaved PCM, cuts it into fixed frames
//! and emits a configuration frame (`AOPUSHDR` / `AOPUSDLY` / `AOPUSPRL`)
//! before the first packet. The decoder accepts that frame either as the
//! session's codec-specific data or in-band as the first packet.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};

use super::configuration::CodecConfiguration;
use super::software::Transform;
use crate::audio::opus_config::{
    build_config_frame, is_opus_config_frame, parse_config_frame, OpusCsd, OpusHead,
};
use crate::error::CodecError;

/// Encoder lookahead at 48 kHz reported in the identification header.
const ENCODER_PRE_SKIP: u16 = 312;
/// Seek pre-roll recommended by RFC 7845.
const SEEK_PRE_ROLL_NS: u64 = 80_000_000;
/// 120 ms at 48 kHz, the largest packet duration OPUS allows.
const MAX_FRAME_SAMPLES: usize = 5760;
const MAX_PACKET_SIZE: usize = 4000;

fn channels(count: u32) -> opus::Channels {
    if count == 1 {
        opus::Channels::Mono
    } else {
        opus::Channels::Stereo
    }
}

/// Frame size per channel: the configured one when OPUS accepts it,
/// otherwise 20 ms.
fn frame_size(config: &CodecConfiguration) -> usize {
    let rate = config.sample_rate();
    let allowed = [rate / 400, rate / 200, rate / 100, rate / 50, rate / 25, rate * 3 / 50];
    let requested = config.samples_per_frame();
    if allowed.contains(&requested) {
        requested as usize
    } else {
        (rate / 50) as usize
    }
}

fn pcm_to_samples(data: &[u8], out: &mut Vec<i16>) {
    out.extend(
        data.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]])),
    );
}

fn samples_to_pcm(samples: &[i16]) -> Bytes {
    let mut pcm = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        pcm.put_i16_le(s);
    }
    pcm.freeze()
}

// ======================== Encoder ========================

pub struct OpusEncoderTransform {
    encoder: opus::Encoder,
    sample_rate: u32,
    channels: u32,
    bitrate: Option<u32>,
    frame_samples: usize,
    pending: Vec<i16>,
    odd_byte: Option<u8>,
}

impl OpusEncoderTransform {
    pub fn new(config: &CodecConfiguration) -> Result<Self, CodecError> {
        let encoder = Self::open(config.sample_rate(), config.channel_count(), config.bitrate())?;
        Ok(Self {
            encoder,
            sample_rate: config.sample_rate(),
            channels: config.channel_count(),
            bitrate: config.bitrate(),
            frame_samples: frame_size(config) * config.channel_count() as usize,
            pending: Vec::new(),
            odd_byte: None,
        })
    }

    fn open(sample_rate: u32, channel_count: u32, bitrate: Option<u32>) -> Result<opus::Encoder, CodecError> {
        let mut encoder =
            opus::Encoder::new(sample_rate, channels(channel_count), opus::Application::Audio)
                .with_context(|| format!("opus encoder {}Hz/{}ch", sample_rate, channel_count))?;
        if let Some(bitrate) = bitrate {
            encoder
                .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
                .context("set opus bitrate")?;
        }
        Ok(encoder)
    }

    fn encode_frame(&mut self, frame: &[i16], out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        let mut packet = vec![0u8; MAX_PACKET_SIZE];
        let len = self.encoder.encode(frame, &mut packet)?;
        packet.truncate(len);
        out.push(Bytes::from(packet));
        Ok(())
    }
}

impl Transform for OpusEncoderTransform {
    fn name(&self) -> &str {
        "opus-encoder"
    }

    fn config_frame(&mut self) -> Option<Bytes> {
        let head = OpusHead::new(self.channels as u8, ENCODER_PRE_SKIP, self.sample_rate);
        let pre_skip_ns = ENCODER_PRE_SKIP as u64 * 1_000_000_000 / 48_000;
        let csd = OpusCsd::new(
            head.to_bytes(),
            Bytes::copy_from_slice(&pre_skip_ns.to_le_bytes()),
            Bytes::copy_from_slice(&SEEK_PRE_ROLL_NS.to_le_bytes()),
        );
        Some(build_config_frame(&csd))
    }

    fn process(&mut self, input: &[u8], out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        let mut data = Vec::with_capacity(input.len() + 1);
        data.extend(self.odd_byte.take());
        data.extend_from_slice(input);
        if data.len() % 2 != 0 {
            self.odd_byte = data.pop();
        }
        pcm_to_samples(&data, &mut self.pending);

        let frame_samples = self.frame_samples;
        let whole = self.pending.len() / frame_samples * frame_samples;
        let frames: Vec<i16> = self.pending.drain(..whole).collect();
        for frame in frames.chunks_exact(frame_samples) {
            self.encode_frame(frame, out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        self.odd_byte = None;
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut frame = std::mem::take(&mut self.pending);
        frame.resize(self.frame_samples, 0);
        self.encode_frame(&frame, out)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.odd_byte = None;
        match Self::open(self.sample_rate, self.channels, self.bitrate) {
            Ok(encoder) => self.encoder = encoder,
            Err(e) => log::warn!("opus encoder reset failed, keeping state: {}", e),
        }
    }
}

// ======================== Decoder ========================

pub struct OpusDecoderTransform {
    decoder: opus::Decoder,
    sample_rate: u32,
    channels: u32,
    /// Pre-skip from the identification header, in output samples per channel.
    pre_skip: usize,
    skip_remaining: usize,
    scratch: Vec<i16>,
}

impl OpusDecoderTransform {
    pub fn new(config: &CodecConfiguration) -> Result<Self, CodecError> {
        let csd = config.csd();
        let head = if is_opus_config_frame(csd) {
            parse_config_frame(csd).and_then(|csd| csd.head())
        } else {
            OpusHead::parse(csd)
        };
        let channels = head
            .as_ref()
            .map(|h| h.channel_count.clamp(1, 2) as u32)
            .unwrap_or(config.channel_count());
        let sample_rate = config.sample_rate();
        let decoder = Self::open(sample_rate, channels)?;
        let pre_skip = head
            .as_ref()
            .map(|h| Self::scale_pre_skip(h.pre_skip, sample_rate))
            .unwrap_or(0);
        Ok(Self {
            decoder,
            sample_rate,
            channels,
            pre_skip,
            skip_remaining: pre_skip,
            scratch: vec![0; MAX_FRAME_SAMPLES * channels as usize],
        })
    }

    fn open(sample_rate: u32, channel_count: u32) -> Result<opus::Decoder, CodecError> {
        let decoder = opus::Decoder::new(sample_rate, channels(channel_count))
            .with_context(|| format!("opus decoder {}Hz/{}ch", sample_rate, channel_count))?;
        Ok(decoder)
    }

    fn scale_pre_skip(pre_skip: u16, sample_rate: u32) -> usize {
        (pre_skip as u64 * sample_rate as u64 / 48_000) as usize
    }
}

impl Transform for OpusDecoderTransform {
    fn name(&self) -> &str {
        "opus-decoder"
    }

    fn process(&mut self, input: &[u8], out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        if is_opus_config_frame(input) {
            if let Some(head) = parse_config_frame(input).and_then(|csd| csd.head()) {
                self.pre_skip = Self::scale_pre_skip(head.pre_skip, self.sample_rate);
                self.skip_remaining = self.pre_skip;
                log::debug!("in-band opus config, pre-skip {} samples", self.pre_skip);
            }
            return Ok(());
        }

        let decoded = self.decoder.decode(input, &mut self.scratch, false)?;
        let skip = self.skip_remaining.min(decoded);
        self.skip_remaining -= skip;
        let channels = self.channels as usize;
        let samples = &self.scratch[skip * channels..decoded * channels];
        if !samples.is_empty() {
            out.push(samples_to_pcm(samples));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.skip_remaining = self.pre_skip;
        match Self::open(self.sample_rate, self.channels) {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => log::warn!("opus decoder reset failed, keeping state: {}", e),
        }
    }
}
