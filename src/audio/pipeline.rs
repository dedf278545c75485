//! The pipeline that wires a capture source, a codec session and a
//! playback sink together.
//!
//! Each stage runs on its own OS thread (not tokio tasks) so real-time
//! audio never competes with async network work:
//!
//! - `audio-capture`: source → input queue
//! - `audio-codec`: input queue → [`SynchronousCodecLoop`] → output queue
//! - `audio-sink`: output queue → sink

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use super::clock::PresentationClock;
use super::codec::{BufferInfo, CodecSession};
use super::codec_loop::{CodecHandler, InputFill, LoopExit, OutputKind, SynchronousCodecLoop, DEFAULT_IDLE_BACKOFF};
use super::device::{CaptureSource, PlaybackSink};
use super::frame::Frame;
use super::frame_queue::{BoundedFrameQueue, DEFAULT_QUEUE_CAPACITY};
use super::play::sink_thread;
use super::record::capture_thread;
use crate::error::PipelineError;

/// Runtime knobs of an [`AudioPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub input_capacity: usize,
    pub output_capacity: usize,
    pub idle_backoff: Duration,
    /// Pass codec configuration buffers on to the sink.
    pub forward_config: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            input_capacity: DEFAULT_QUEUE_CAPACITY,
            output_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            forward_config: true,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub captured: AtomicU64,
    pub produced: AtomicU64,
    pub written: AtomicU64,
    pub sink_errors: AtomicU64,
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub input_dropped: u64,
    pub frames_produced: u64,
    pub output_dropped: u64,
    pub frames_written: u64,
    pub sink_errors: u64,
}

/// Feeds the codec from the input queue and offers its output downstream.
struct QueueHandler {
    input: Arc<BoundedFrameQueue<Frame>>,
    output: Arc<BoundedFrameQueue<Frame>>,
    counters: Arc<PipelineCounters>,
    forward_config: bool,
    /// Wait for room in the output queue instead of dropping.
    lossless: bool,
    carry: Option<Bytes>,
}

impl CodecHandler for QueueHandler {
    fn on_input_data(&mut self, buf: &mut BytesMut, clock: &PresentationClock) -> InputFill {
        let mut data = match self.carry.take() {
            Some(data) => data,
            None => {
                // Check before polling so a frame offered just ahead of
                // shutdown is never mistaken for end of stream.
                let closed = self.input.is_shutdown();
                match self.input.poll() {
                    Some(frame) => frame.into_bytes(),
                    None if closed => return InputFill::EndOfStream,
                    None => return InputFill::Pending,
                }
            }
        };
        let room = buf.capacity().max(1);
        if data.len() > room {
            self.carry = Some(data.split_off(room));
        }
        buf.extend_from_slice(&data);
        InputFill::Data {
            presentation_time_us: clock.presentation_time_us(),
        }
    }

    fn on_output_data(&mut self, data: &Bytes, _info: &BufferInfo, kind: OutputKind) -> anyhow::Result<()> {
        match kind {
            OutputKind::Config if !self.forward_config => return Ok(()),
            OutputKind::EndOfStream if data.is_empty() => return Ok(()),
            _ => {}
        }
        self.counters.produced.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(data.clone());
        if self.lossless {
            self.output.offer_blocking(frame);
        } else {
            self.output.offer(frame);
        }
        Ok(())
    }

    fn on_end_of_stream(&mut self) {
        log::info!("Codec reached end of stream");
    }
}

/// A running capture → codec → sink pipeline.
pub struct AudioPipeline {
    running: Arc<AtomicBool>,
    input: Arc<BoundedFrameQueue<Frame>>,
    output: Arc<BoundedFrameQueue<Frame>>,
    counters: Arc<PipelineCounters>,
    capture_handle: Option<JoinHandle<()>>,
    codec_handle: Option<JoinHandle<()>>,
    sink_handle: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    /// Start the codec session, then spawn the three stage threads.
    ///
    /// A source that is not real-time is throttled to the codec and sink
    /// so nothing it produces is dropped. A codec that fails to start is reported here and no thread is
    /// spawned.
    pub fn start(
        options: PipelineOptions,
        source: Box<dyn CaptureSource>,
        sink: Box<dyn PlaybackSink>,
        session: CodecSession,
    ) -> Result<Self, PipelineError> {
        let mut codec_loop = SynchronousCodecLoop::new(session).with_idle_backoff(options.idle_backoff);
        codec_loop.start()?;

        log::info!(
            "AudioPipeline starting: source={}, sink={}, codec={}, queues={}/{}",
            source.name(),
            sink.name(),
            codec_loop.session().codec_name(),
            options.input_capacity,
            options.output_capacity,
        );

        let mut pipeline = Self {
            running: Arc::new(AtomicBool::new(true)),
            input: Arc::new(BoundedFrameQueue::new("input", options.input_capacity)),
            output: Arc::new(BoundedFrameQueue::new("output", options.output_capacity)),
            counters: Arc::new(PipelineCounters::default()),
            capture_handle: None,
            codec_handle: None,
            sink_handle: None,
        };
        if let Err(e) = pipeline.spawn_threads(&options, codec_loop, source, sink) {
            pipeline.stop();
            return Err(e);
        }
        Ok(pipeline)
    }

    fn spawn_threads(
        &mut self,
        options: &PipelineOptions,
        mut codec_loop: SynchronousCodecLoop,
        source: Box<dyn CaptureSource>,
        sink: Box<dyn PlaybackSink>,
    ) -> Result<(), PipelineError> {
        self.sink_handle = Some({
            let running = self.running.clone();
            let output = self.output.clone();
            let counters = self.counters.clone();
            spawn("audio-sink", move || {
                if let Err(e) = sink_thread(sink, &output, &running, &counters) {
                    log::error!("Sink thread error: {:#}", e);
                }
            })?
        });

        self.codec_handle = Some({
            let running = self.running.clone();
            let mut handler = QueueHandler {
                input: self.input.clone(),
                output: self.output.clone(),
                counters: self.counters.clone(),
                forward_config: options.forward_config,
                lossless: !source.is_realtime(),
                carry: None,
            };
            spawn("audio-codec", move || {
                match codec_loop.run(&mut handler, &running) {
                    Ok(LoopExit::EndOfStream) | Ok(LoopExit::Cancelled) => {}
                    Err(e) => log::error!("Codec thread error: {}", e),
                }
                if let Err(e) = codec_loop.stop() {
                    log::warn!("Codec stop failed: {}", e);
                }
                if let Err(e) = codec_loop.release() {
                    log::warn!("Codec release failed: {}", e);
                }
                handler.output.shutdown();
            })?
        });

        self.capture_handle = Some({
            let running = self.running.clone();
            let input = self.input.clone();
            let counters = self.counters.clone();
            spawn("audio-capture", move || {
                if let Err(e) = capture_thread(source, &input, &running, &counters) {
                    log::error!("Capture thread error: {:#}", e);
                }
            })?
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True once every stage thread has exited.
    pub fn is_finished(&self) -> bool {
        [&self.capture_handle, &self.codec_handle, &self.sink_handle]
            .iter()
            .all(|h| h.as_ref().is_none_or(|h| h.is_finished()))
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            input_dropped: self.input.dropped(),
            frames_produced: self.counters.produced.load(Ordering::Relaxed),
            output_dropped: self.output.dropped(),
            frames_written: self.counters.written.load(Ordering::Relaxed),
            sink_errors: self.counters.sink_errors.load(Ordering::Relaxed),
        }
    }

    /// Frames still held by the input and output queues.
    pub fn queued_frames(&self) -> usize {
        self.input.len() + self.output.len()
    }

    /// Wait for a finite source to drain through the pipeline.
    pub fn wait(&mut self) -> PipelineStats {
        for handle in [
            self.capture_handle.take(),
            self.codec_handle.take(),
            self.sink_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::SeqCst);
        self.stats()
    }

    /// Signal all stages to stop and wait for them to finish. Idempotent.
    ///
    /// The codec thread stops and releases its session before shutting the
    /// output queue, so the sink is woken last. Frames left in either queue
    /// are discarded once the stage reading it has exited.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst)
            && self.capture_handle.is_none()
            && self.codec_handle.is_none()
            && self.sink_handle.is_none()
        {
            return;
        }
        log::info!("AudioPipeline stopping");
        self.input.shutdown();
        if let Some(h) = self.codec_handle.take() {
            let _ = h.join();
        }
        // Covers a codec thread that never spawned.
        self.output.shutdown();
        if let Some(h) = self.sink_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.capture_handle.take() {
            let _ = h.join();
        }
        let discarded = self.input.clear() + self.output.clear();
        if discarded > 0 {
            log::debug!("Discarded {} queued frames", discarded);
        }
        log::info!("AudioPipeline stopped: {:?}", self.stats());
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn<F>(name: &'static str, f: F) -> Result<JoinHandle<()>, PipelineError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|source| PipelineError::Spawn { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{CodecConfiguration, CodecDirection, CodecKind};
    use crate::audio::device::{MemorySink, MemorySource};

    fn pcm_session() -> CodecSession {
        let config = CodecConfiguration::new(CodecKind::Pcm, CodecDirection::Decode, 8000, 1).unwrap();
        CodecSession::create(config).unwrap()
    }

    #[test]
    fn oversized_frames_are_split_across_slots() {
        let input = Arc::new(BoundedFrameQueue::new("in", 4));
        let output = Arc::new(BoundedFrameQueue::new("out", 4));
        let mut handler = QueueHandler {
            input: input.clone(),
            output,
            counters: Arc::default(),
            forward_config: true,
            lossless: false,
            carry: None,
        };
        input.offer(Frame::new(vec![1u8; 10]));
        let clock = PresentationClock::new(8000, 1024);

        let mut buf = BytesMut::with_capacity(4);
        assert!(matches!(handler.on_input_data(&mut buf, &clock), InputFill::Data { .. }));
        let first = buf.len();
        assert!(first >= 4 && first <= 10);

        let mut total = first;
        while total < 10 {
            let mut buf = BytesMut::with_capacity(4);
            assert!(matches!(handler.on_input_data(&mut buf, &clock), InputFill::Data { .. }));
            total += buf.len();
        }
        assert_eq!(total, 10);

        let mut buf = BytesMut::with_capacity(4);
        assert_eq!(handler.on_input_data(&mut buf, &clock), InputFill::Pending);
        input.shutdown();
        assert_eq!(handler.on_input_data(&mut buf, &clock), InputFill::EndOfStream);
    }

    #[test]
    fn passthrough_delivers_everything() {
        let sink = MemorySink::new();
        let mut pipeline = AudioPipeline::start(
            PipelineOptions::default(),
            Box::new(MemorySource::chunked(vec![5u8; 1000], 100)),
            Box::new(sink.clone()),
            pcm_session(),
        )
        .unwrap();
        let stats = pipeline.wait();
        assert_eq!(sink.contents(), vec![5u8; 1000]);
        assert_eq!(stats.frames_captured, 10);
        assert_eq!(stats.frames_written, 10);
        pipeline.stop();
        pipeline.stop();
    }

    /// Live source that always has a chunk ready.
    struct Firehose;

    impl CaptureSource for Firehose {
        fn name(&self) -> &str {
            "firehose"
        }

        fn read(&mut self) -> anyhow::Result<Option<Bytes>> {
            Ok(Some(Bytes::from_static(&[7u8; 16])))
        }
    }

    struct SlowSink;

    impl PlaybackSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        fn write(&mut self, _data: &[u8]) -> anyhow::Result<()> {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        }
    }

    #[test]
    fn stop_discards_frames_left_in_queues() {
        let options = PipelineOptions {
            input_capacity: 4,
            output_capacity: 4,
            ..PipelineOptions::default()
        };
        let mut pipeline =
            AudioPipeline::start(options, Box::new(Firehose), Box::new(SlowSink), pcm_session()).unwrap();
        thread::sleep(Duration::from_millis(100));
        pipeline.stop();
        assert!(pipeline.input.is_empty());
        assert!(pipeline.output.is_empty());
        assert_eq!(pipeline.queued_frames(), 0);
    }
}
