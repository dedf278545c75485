//! ALSA PCM endpoints for live capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};

use super::device::{CaptureSource, PlaybackSink};

/// XRUN recoveries attempted per read or write before giving up.
const MAX_XRUN_RETRIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames (one frame = channels × 2 bytes).
    pub period_size: usize,
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if params.sample_rate != sample_rate {
        log::warn!(
            "ALSA {}: requested {}Hz, hardware gave {}Hz",
            dir_name,
            sample_rate,
            params.sample_rate
        );
    }
    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

pub struct AlsaCapture {
    name: String,
    pcm: PCM,
    params: AlsaParams,
    read_buf: Vec<i16>,
}

impl AlsaCapture {
    pub fn open(device: &str, sample_rate: u32, channels: u32) -> Result<Self> {
        let (pcm, params) = open_pcm(device, Direction::Capture, sample_rate, channels, None, "Capture")?;
        let read_buf = vec![0i16; params.period_size * params.channels as usize];
        Ok(Self {
            name: device.to_string(),
            pcm,
            params,
            read_buf,
        })
    }

    pub fn params(&self) -> &AlsaParams {
        &self.params
    }
}

impl CaptureSource for AlsaCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Option<Bytes>> {
        let io = self.pcm.io_i16()?;
        let mut retries = 0;
        let frames = loop {
            match io.readi(&mut self.read_buf) {
                Ok(frames) => break frames,
                Err(e) if retries < MAX_XRUN_RETRIES => {
                    retries += 1;
                    log::warn!("ALSA capture error: {}, recovering ({})", e, retries);
                    self.pcm.prepare().context("Failed to recover PCM capture")?;
                }
                Err(e) => return Err(e).context("ALSA capture kept failing"),
            }
        };

        let samples = &self.read_buf[..frames * self.params.channels as usize];
        let mut out = BytesMut::with_capacity(samples.len() * 2);
        for &s in samples {
            out.put_i16_le(s);
        }
        Ok(Some(out.freeze()))
    }
}

pub struct AlsaPlayback {
    name: String,
    pcm: PCM,
    params: AlsaParams,
    samples: Vec<i16>,
}

impl AlsaPlayback {
    pub fn open(device: &str, sample_rate: u32, channels: u32, period_size: Option<usize>) -> Result<Self> {
        let (pcm, params) = open_pcm(
            device,
            Direction::Playback,
            sample_rate,
            channels,
            period_size,
            "Playback",
        )?;
        Ok(Self {
            name: device.to_string(),
            pcm,
            params,
            samples: Vec::new(),
        })
    }

    pub fn params(&self) -> &AlsaParams {
        &self.params
    }
}

impl PlaybackSink for AlsaPlayback {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.samples.clear();
        self.samples.extend(
            data.chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]])),
        );
        let channels = self.params.channels as usize;
        let total_frames = self.samples.len() / channels;

        let io = self.pcm.io_i16()?;
        let mut written = 0;
        let mut retries = 0;
        while written < total_frames {
            match io.writei(&self.samples[written * channels..total_frames * channels]) {
                Ok(n) => written += n,
                Err(e) if retries < MAX_XRUN_RETRIES => {
                    retries += 1;
                    log::warn!("ALSA playback error: {}, recovering ({})", e, retries);
                    self.pcm.prepare().context("Failed to recover PCM playback")?;
                }
                Err(e) => return Err(e).context("ALSA playback kept failing"),
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.pcm.drain()?;
        Ok(())
    }
}
