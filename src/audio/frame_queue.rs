//! Fixed-capacity frame queue between the capture, codec and sink threads.
//!
//! Live producers never block: when the queue is full the incoming frame is
//! dropped, trading gapless audio for bounded latency. Producers that are
//! not real-time use [`BoundedFrameQueue::offer_blocking`] and wait for room
//! instead. Consumers either poll
//! (and back off briefly when empty) or block in [`BoundedFrameQueue::take`]
//! until a frame arrives or the queue is shut down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::frame::Frame;

/// Default capacity, matching the codec input queues of the source SDK.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub struct BoundedFrameQueue<T = Frame> {
    name: String,
    capacity: usize,
    tx: Sender<T>,
    rx: Receiver<T>,
    // Dropping the sender disconnects `shutdown_rx`, which wakes every
    // blocked `take`.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> BoundedFrameQueue<T> {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        Self {
            name: name.into(),
            capacity,
            tx,
            rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue `frame` without blocking.
    ///
    /// Returns false if the queue is full (the frame is dropped) or shut down.
    pub fn offer(&self, frame: T) -> bool {
        if self.is_shutdown() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("[{}] queue full ({}), dropped frame #{}", self.name, self.capacity, dropped);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Enqueue `frame`, waiting for room while the queue is full.
    ///
    /// Returns false if the queue is shut down before the frame fits.
    pub fn offer_blocking(&self, frame: T) -> bool {
        if self.is_shutdown() {
            return false;
        }
        crossbeam_channel::select! {
            send(self.tx, frame) -> sent => sent.is_ok(),
            recv(self.shutdown_rx) -> _ => false,
        }
    }

    /// Dequeue the oldest frame, or `None` immediately if empty.
    ///
    /// Frames still queued at shutdown remain pollable so a consumer can
    /// drain them.
    pub fn poll(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Block until a frame is available. Returns `None` once the queue has
    /// been shut down.
    pub fn take(&self) -> Option<T> {
        if self.is_shutdown() {
            return None;
        }
        crossbeam_channel::select! {
            recv(self.rx) -> frame => frame.ok(),
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        if self.is_shutdown() {
            return None;
        }
        crossbeam_channel::select! {
            recv(self.rx) -> frame => frame.ok(),
            recv(self.shutdown_rx) -> _ => None,
            default(timeout) => None,
        }
    }

    /// Reject further offers and wake blocked takers. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sender = match self.shutdown_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        log::debug!("[{}] queue shut down with {} frames pending", self.name, self.len());
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Discard all queued frames, returning how many were removed.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let queue: BoundedFrameQueue<u8> = BoundedFrameQueue::new("zero", 0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.offer(1));
        assert!(!queue.offer(2));
    }

    #[test]
    fn shutdown_wakes_blocked_take() {
        let queue: Arc<BoundedFrameQueue<u8>> = Arc::new(BoundedFrameQueue::new("wake", 4));
        let taker = {
            let queue = queue.clone();
            thread::spawn(move || queue.take())
        };
        thread::sleep(Duration::from_millis(50));
        queue.shutdown();
        assert_eq!(taker.join().unwrap(), None);
        assert!(!queue.offer(7));
    }

    #[test]
    fn clear_reports_discarded_frames() {
        let queue: BoundedFrameQueue<u8> = BoundedFrameQueue::new("clear", 4);
        for i in 0..3 {
            assert!(queue.offer(i));
        }
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn offer_blocking_waits_for_room() {
        let queue: Arc<BoundedFrameQueue<u8>> = Arc::new(BoundedFrameQueue::new("room", 1));
        assert!(queue.offer_blocking(1));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.offer_blocking(2))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.poll(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.poll(), Some(2));
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn shutdown_wakes_blocked_offer() {
        let queue: Arc<BoundedFrameQueue<u8>> = Arc::new(BoundedFrameQueue::new("full", 1));
        assert!(queue.offer(1));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.offer_blocking(2))
        };
        thread::sleep(Duration::from_millis(50));
        queue.shutdown();
        assert!(!producer.join().unwrap());
        assert_eq!(queue.poll(), Some(1));
        assert_eq!(queue.poll(), None);
    }
}
