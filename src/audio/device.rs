//! Capture and playback endpoints of a pipeline.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};

/// Producer side of a pipeline, read from the `audio-capture` thread.
pub trait CaptureSource: Send {
    fn name(&self) -> &str;

    /// Read the next chunk. `Ok(None)` ends the stream; an empty chunk
    /// means nothing is available yet.
    fn read(&mut self) -> Result<Option<Bytes>>;

    /// Live sources produce at the stream rate and lose frames when the
    /// pipeline falls behind. Sources that are not real-time are throttled
    /// by the pipeline instead, so every chunk they produce is kept.
    fn is_realtime(&self) -> bool {
        true
    }
}

/// Consumer side of a pipeline, written from the `audio-sink` thread.
pub trait PlaybackSink: Send {
    fn name(&self) -> &str;

    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Flush buffered output at end of stream.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reads a raw file in fixed-size chunks.
pub struct RawFileSource {
    name: String,
    file: File,
    chunk_size: usize,
}

impl RawFileSource {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open capture file '{}'", path.display()))?;
        Ok(Self {
            name: path.display().to_string(),
            file,
            chunk_size: chunk_size.max(1),
        })
    }
}

impl CaptureSource for RawFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Option<Bytes>> {
        let mut buf = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf.freeze()))
    }

    fn is_realtime(&self) -> bool {
        false
    }
}

/// Replays in-memory chunks, then ends the stream.
pub struct MemorySource {
    chunks: std::collections::VecDeque<Bytes>,
}

impl MemorySource {
    pub fn new(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }

    /// Split `data` into chunks of `chunk_size` bytes.
    pub fn chunked(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        let mut data = data.into();
        let chunk_size = chunk_size.max(1);
        let mut chunks = std::collections::VecDeque::new();
        while !data.is_empty() {
            let n = chunk_size.min(data.len());
            chunks.push_back(data.split_to(n));
        }
        Self { chunks }
    }
}

impl CaptureSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn read(&mut self) -> Result<Option<Bytes>> {
        Ok(self.chunks.pop_front())
    }

    fn is_realtime(&self) -> bool {
        false
    }
}

pub struct RawFileSink {
    name: String,
    writer: BufWriter<File>,
}

impl RawFileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file '{}'", path.display()))?;
        Ok(Self {
            name: path.display().to_string(),
            writer: BufWriter::new(file),
        })
    }
}

impl PlaybackSink for RawFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects every written frame. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<Bytes>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// All frames concatenated.
    pub fn contents(&self) -> Vec<u8> {
        self.frames().concat()
    }
}

impl PlaybackSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(Bytes::copy_from_slice(data));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn write(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_chunks() {
        let mut source = MemorySource::chunked(vec![1u8, 2, 3, 4, 5], 2);
        assert_eq!(&source.read().unwrap().unwrap()[..], &[1, 2]);
        assert_eq!(&source.read().unwrap().unwrap()[..], &[3, 4]);
        assert_eq!(&source.read().unwrap().unwrap()[..], &[5]);
        assert!(source.read().unwrap().is_none());
        assert!(!source.is_realtime());
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("audiopipe-{}.raw", uuid::Uuid::new_v4()));
        let mut sink = RawFileSink::create(&path).unwrap();
        sink.write(&[9; 10]).unwrap();
        sink.finish().unwrap();
        drop(sink);

        let mut source = RawFileSource::open(&path, 4).unwrap();
        let mut total = 0;
        while let Some(chunk) = source.read().unwrap() {
            total += chunk.len();
        }
        assert_eq!(total, 10);
        assert!(!source.is_realtime());
        std::fs::remove_file(path).unwrap();
    }
}
