use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use super::device::CaptureSource;
use super::frame::Frame;
use super::frame_queue::BoundedFrameQueue;
use super::pipeline::PipelineCounters;

/// Pause after a source reported no data yet.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);

/// Body of the `audio-capture` thread: source → input queue.
///
/// The input queue is shut down when the source ends, which the codec
/// thread turns into end of stream. Sources that are not real-time wait for
/// queue room rather than dropping frames.
pub fn capture_thread(
    mut source: Box<dyn CaptureSource>,
    input: &BoundedFrameQueue<Frame>,
    running: &AtomicBool,
    counters: &PipelineCounters,
) -> Result<()> {
    let realtime = source.is_realtime();
    log::info!("Capture started: source={}, realtime={}", source.name(), realtime);

    let result = loop {
        if !running.load(Ordering::Relaxed) {
            break Ok(());
        }
        match source.read() {
            Ok(Some(chunk)) if chunk.is_empty() => thread::sleep(EMPTY_READ_BACKOFF),
            Ok(Some(chunk)) => {
                counters.captured.fetch_add(1, Ordering::Relaxed);
                let frame = Frame::new(chunk);
                if realtime {
                    // A full queue drops the frame; the queue counts it.
                    input.offer(frame);
                } else if !input.offer_blocking(frame) {
                    break Ok(());
                }
            }
            Ok(None) => {
                log::info!("Capture source {} reached end of stream", source.name());
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    input.shutdown();
    log::info!(
        "Capture stopped: {} frames, {} dropped",
        counters.captured.load(Ordering::Relaxed),
        input.dropped()
    );
    result
}
