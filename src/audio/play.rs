use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use super::device::PlaybackSink;
use super::frame::Frame;
use super::frame_queue::BoundedFrameQueue;
use super::pipeline::PipelineCounters;

/// Body of the `audio-sink` thread: output queue → sink.
///
/// Write errors are logged and the frame is skipped. After the queue is
/// shut down, frames still queued are written unless the pipeline is
/// being stopped.
pub fn sink_thread(
    mut sink: Box<dyn PlaybackSink>,
    output: &BoundedFrameQueue<Frame>,
    running: &AtomicBool,
    counters: &PipelineCounters,
) -> Result<()> {
    log::info!("Sink started: sink={}", sink.name());

    let mut write = |frame: Frame| match sink.write(&frame) {
        Ok(()) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.sink_errors.fetch_add(1, Ordering::Relaxed);
            log::error!("Sink write error: {:#}", e);
        }
    };

    while let Some(frame) = output.take() {
        write(frame);
    }
    while running.load(Ordering::Relaxed) {
        match output.poll() {
            Some(frame) => write(frame),
            None => break,
        }
    }

    sink.finish()?;
    log::info!(
        "Sink stopped: {} frames written",
        counters.written.load(Ordering::Relaxed)
    );
    Ok(())
}
